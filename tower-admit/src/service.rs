use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use admit::Engine;
use admit::Gate;
use admit::QueueingLimiter;
use admit::RateLimitExceeded;
use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use opentelemetry::metrics::Meter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use crate::AdmitError;
use crate::layer::Hooks;

type QueuedFuture<Resp> = Pin<Box<dyn Future<Output = Result<Resp, BoxError>> + Send>>;

#[derive(Clone, Debug)]
struct AdmitServiceMetrics {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
    bypassed: Counter<u64>,
}

impl AdmitServiceMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            admitted: meter.u64_counter("admitted").build(),
            rejected: meter.u64_counter("rejected").build(),
            bypassed: meter.u64_counter("bypassed").build(),
        }
    }
}

// The call path is fixed when the service is built.
#[derive(Clone, Debug)]
enum Dispatch {
    Gate(Gate),
    Queue(Arc<dyn QueueingLimiter>),
}

impl From<Engine> for Dispatch {
    fn from(engine: Engine) -> Self {
        match engine {
            Engine::Synchronous(limiter) => Dispatch::Gate(Gate::new(limiter)),
            Engine::Queueing(limiter) => Dispatch::Queue(limiter),
        }
    }
}

pub struct AdmitService<S, Req, Resp> {
    inner: S,
    dispatch: Dispatch,
    kind: &'static str,
    hooks: Hooks<Req, Resp>,
    instruments: AdmitServiceMetrics,
}

impl<S, Req, Resp> fmt::Debug for AdmitService<S, Req, Resp>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmitService")
            .field("inner", &self.inner)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

impl<S, Req, Resp> Clone for AdmitService<S, Req, Resp>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            dispatch: self.dispatch.clone(),
            kind: self.kind,
            hooks: self.hooks.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, Req, Resp> AdmitService<S, Req, Resp> {
    pub(crate) fn new(inner: S, engine: Engine, hooks: Hooks<Req, Resp>, meter: &Meter) -> Self {
        Self {
            inner,
            kind: engine.kind(),
            dispatch: Dispatch::from(engine),
            hooks,
            instruments: AdmitServiceMetrics::new(meter),
        }
    }

    fn attributes(&self) -> [KeyValue; 1] {
        [KeyValue::new("engine", self.kind)]
    }

    fn reject<F>(&self, req: &Req, rejection: RateLimitExceeded) -> ResponseFuture<F, Resp> {
        debug!(key = %rejection.key, reason = %rejection.reason, "request rejected");
        self.instruments.rejected.add(1, &self.attributes());
        ResponseFuture::Ready {
            result: Some((self.hooks.on_rejected)(req, rejection)),
        }
    }
}

impl<S, Req, Resp> Service<Req> for AdmitService<S, Req, Resp>
where
    S: Service<Req, Response = Resp, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Response = Resp;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future, Resp>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Admission is decided per request in `call`, once the key is known.
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        if let Some(bypass) = &self.hooks.bypass
            && bypass(&req)
        {
            debug!("request bypassed rate limiting");
            self.instruments.bypassed.add(1, &self.attributes());
            return ResponseFuture::Inner {
                future: self.inner.call(req),
            };
        }

        let key = (self.hooks.key_fn)(&req);

        match &self.dispatch {
            Dispatch::Gate(gate) => match gate.admit(&key) {
                ControlFlow::Continue(()) => {
                    self.instruments.admitted.add(1, &self.attributes());
                    ResponseFuture::Inner {
                        future: self.inner.call(req),
                    }
                }
                ControlFlow::Break(rejection) => self.reject(&req, rejection),
            },
            Dispatch::Queue(limiter) => match limiter.enqueue(&key, Box::new(|| {})) {
                Ok(ticket) => {
                    debug!(%key, "request queued");
                    self.instruments.admitted.add(1, &self.attributes());
                    // `self.inner` is ready; hand it to the future and keep a fresh clone.
                    let clone = self.inner.clone();
                    let mut inner = std::mem::replace(&mut self.inner, clone);
                    ResponseFuture::Queued {
                        future: Box::pin(async move {
                            if ticket.await.is_err() {
                                return Err(Box::new(AdmitError::Closed) as BoxError);
                            }
                            inner.call(req).await
                        }),
                    }
                }
                Err(rejection) => self.reject(&req, rejection),
            },
        }
    }
}

pin_project! {
    /// The response future of an [`AdmitService`].
    #[project = ResponseFutureProj]
    pub enum ResponseFuture<F, Resp> {
        Inner {
            #[pin]
            future: F,
        },
        Ready {
            result: Option<Result<Resp, BoxError>>,
        },
        Queued {
            future: QueuedFuture<Resp>,
        },
    }
}

impl<F, Resp> Future for ResponseFuture<F, Resp>
where
    F: Future<Output = Result<Resp, BoxError>>,
{
    type Output = Result<Resp, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Inner { future } => future.poll(cx),
            ResponseFutureProj::Ready { result } => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(Box::new(AdmitError::Inner(
                    "response future polled after completion".to_owned(),
                )) as BoxError)
            })),
            ResponseFutureProj::Queued { future } => future.as_mut().poll(cx),
        }
    }
}
