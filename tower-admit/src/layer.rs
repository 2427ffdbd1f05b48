use std::fmt;
use std::sync::Arc;

use admit::Engine;
use admit::FixedWindow;
use admit::FixedWindowConfig;
use admit::LeakyBucket;
use admit::LeakyBucketConfig;
use admit::RateLimitExceeded;
use admit::SlidingLog;
use admit::SlidingWindow;
use admit::TokenBucket;
use admit::TokenBucketConfig;
use admit::WindowConfig;
use opentelemetry::global;
use opentelemetry::metrics::Meter;
use tower::BoxError;
use tower::Layer;

use crate::AdmitError;
use crate::client_addr;
use crate::service::AdmitService;
use crate::too_many_requests;

/// Derives the rate limit key from a request.
pub type KeyFn<Req> = Arc<dyn Fn(&Req) -> String + Send + Sync>;

/// Returns `true` for requests that skip rate limiting entirely.
pub type BypassFn<Req> = Arc<dyn Fn(&Req) -> bool + Send + Sync>;

/// Produces the outcome of a refused request in place of the inner service.
pub type RejectFn<Req, Resp> =
    Arc<dyn Fn(&Req, RateLimitExceeded) -> Result<Resp, BoxError> + Send + Sync>;

pub(crate) struct Hooks<Req, Resp> {
    pub(crate) key_fn: KeyFn<Req>,
    pub(crate) bypass: Option<BypassFn<Req>>,
    pub(crate) on_rejected: RejectFn<Req, Resp>,
}

// Deriving Clone would require Req: Clone and Resp: Clone.
impl<Req, Resp> Clone for Hooks<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            key_fn: Arc::clone(&self.key_fn),
            bypass: self.bypass.clone(),
            on_rejected: Arc::clone(&self.on_rejected),
        }
    }
}

/// Applies keyed admission control to requests.
///
/// Every service produced by one layer shares the same engine, so clones of a
/// service (and services for different routes built from one layer) draw from
/// the same per-key allowances.
pub struct AdmitLayer<Req, Resp> {
    engine: Engine,
    hooks: Hooks<Req, Resp>,
    meter: Meter,
}

impl<Req, Resp> Clone for AdmitLayer<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            hooks: self.hooks.clone(),
            meter: self.meter.clone(),
        }
    }
}

impl<Req, Resp> fmt::Debug for AdmitLayer<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmitLayer")
            .field("engine", &self.engine)
            .field("bypass", &self.hooks.bypass.is_some())
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> AdmitLayer<Req, Resp> {
    /// Create an AdmitLayer keyed by `key_fn`.
    ///
    /// Refused requests fail with [`AdmitError::RateLimited`] until a rejection
    /// handler is installed with [`AdmitLayer::with_rejection`].
    pub fn new<K>(engine: impl Into<Engine>, key_fn: K) -> Self
    where
        K: Fn(&Req) -> String + Send + Sync + 'static,
    {
        Self {
            engine: engine.into(),
            hooks: Hooks {
                key_fn: Arc::new(key_fn),
                bypass: None,
                on_rejected: Arc::new(|_: &Req, rejection| {
                    Err(Box::new(AdmitError::from(rejection)) as BoxError)
                }),
            },
            meter: global::meter("admit_service"),
        }
    }

    /// Replace the key function.
    pub fn with_key_fn<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&Req) -> String + Send + Sync + 'static,
    {
        self.hooks.key_fn = Arc::new(key_fn);
        self
    }

    /// Skip rate limiting for requests matching `bypass`.
    ///
    /// The predicate runs before the key is derived and before any limiter
    /// state is touched.
    pub fn with_bypass<P>(mut self, bypass: P) -> Self
    where
        P: Fn(&Req) -> bool + Send + Sync + 'static,
    {
        self.hooks.bypass = Some(Arc::new(bypass));
        self
    }

    /// Replace the rejection handler.
    pub fn with_rejection<H>(mut self, on_rejected: H) -> Self
    where
        H: Fn(&Req, RateLimitExceeded) -> Result<Resp, BoxError> + Send + Sync + 'static,
    {
        self.hooks.on_rejected = Arc::new(on_rejected);
        self
    }

    /// Record the `admitted`, `rejected` and `bypassed` counters on `meter`
    /// instead of the global `admit_service` meter.
    pub fn with_meter(mut self, meter: Meter) -> Self {
        self.meter = meter;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl<B, RB> AdmitLayer<http::Request<B>, http::Response<RB>>
where
    B: 'static,
    RB: From<String> + 'static,
{
    /// Create an AdmitLayer for HTTP services.
    ///
    /// Keys requests by [`client_addr`] and answers refused requests with
    /// [`too_many_requests`].
    pub fn http(engine: impl Into<Engine>) -> Self {
        Self::new(engine, client_addr::<B>).with_rejection(too_many_requests::<http::Request<B>, RB>)
    }

    pub fn fixed_window(config: FixedWindowConfig) -> Self {
        Self::http(FixedWindow::new(config))
    }

    pub fn sliding_log(config: WindowConfig) -> Self {
        Self::http(SlidingLog::new(config))
    }

    pub fn sliding_window(config: WindowConfig) -> Self {
        Self::http(SlidingWindow::new(config))
    }

    pub fn token_bucket(config: TokenBucketConfig) -> Self {
        Self::http(TokenBucket::new(config))
    }

    pub fn leaky_bucket(config: LeakyBucketConfig) -> Self {
        Self::http(LeakyBucket::new(config))
    }
}

impl<S, Req, Resp> Layer<S> for AdmitLayer<Req, Resp> {
    type Service = AdmitService<S, Req, Resp>;

    fn layer(&self, service: S) -> Self::Service {
        AdmitService::new(
            service,
            self.engine.clone(),
            self.hooks.clone(),
            &self.meter,
        )
    }
}
