use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::Closed;
use crate::KeyedStore;
use crate::LeakyBucketConfig;
use crate::QueueingLimiter;
use crate::RateLimitExceeded;

const MIN_DRAIN_PERIOD: Duration = Duration::from_millis(1);

/// A unit of deferred work.
///
/// Queued units are shared with the drain task through the bucket's keyed
/// store, so they must be `Sync` as well as `Send`.
pub type Work = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Resolves once the queued unit has been executed.
///
/// Resolves to [`Closed`] if the unit was discarded because its bucket (or just
/// its key) was torn down first.
#[derive(Debug)]
#[must_use = "dropping a ticket does not cancel the work, but loses track of it"]
pub struct Ticket {
    done: oneshot::Receiver<()>,
}

impl Future for Ticket {
    type Output = Result<(), Closed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.done)
            .poll(cx)
            .map(|res| res.map_err(|_| Closed))
    }
}

struct Pending {
    work: Work,
    done: oneshot::Sender<()>,
}

struct Queue {
    pending: VecDeque<Pending>,
    drain: Option<JoinHandle<()>>,
    // Distinguishes this queue from an earlier one stored under the same key.
    generation: u64,
}

impl Queue {
    fn stop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        // Dropping the senders resolves every outstanding ticket with `Closed`.
        self.pending.clear();
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("pending", &self.pending.len())
            .field("draining", &self.drain.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug)]
struct Shared {
    config: LeakyBucketConfig,
    queues: KeyedStore<Queue>,
    generations: AtomicU64,
    runtime_warned: AtomicBool,
}

/// A bounded FIFO queue per key, drained at a fixed rate.
///
/// The first `enqueue` for a key starts a background task that, every
/// `1 / leak_rate` seconds, removes and runs exactly one unit from that key's
/// queue. Enqueue and drain serialize on the same per-key lock.
///
/// Drain tasks are torn down by [`LeakyBucket::stop`], [`LeakyBucket::shutdown`]
/// or dropping the bucket. Queues are otherwise kept for every key ever seen.
#[derive(Debug)]
pub struct LeakyBucket {
    shared: Arc<Shared>,
}

impl QueueingLimiter for LeakyBucket {
    fn enqueue(&self, key: &str, work: Work) -> Result<Ticket, RateLimitExceeded> {
        let capacity = self.shared.config.capacity;

        self.shared.queues.with_entry(
            key,
            || Queue {
                pending: VecDeque::new(),
                drain: None,
                generation: self.shared.generations.fetch_add(1, Ordering::Relaxed),
            },
            |queue| {
                if queue.drain.is_none() {
                    queue.drain = self.spawn_drain(key, queue.generation);
                }

                if queue.pending.len() >= capacity {
                    return Err(RateLimitExceeded::queue_full(key, capacity));
                }

                let (done, ticket) = oneshot::channel();
                queue.pending.push_back(Pending { work, done });
                Ok(Ticket { done: ticket })
            },
        )
    }
}

impl LeakyBucket {
    /// Creates a new `LeakyBucket`.
    ///
    /// No task is spawned until the first unit is queued, so this may be called
    /// outside a Tokio runtime. Drain tasks are spawned on the runtime current
    /// at the time of a key's first `enqueue`.
    pub fn new(config: LeakyBucketConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                queues: KeyedStore::new(),
                generations: AtomicU64::new(0),
                runtime_warned: AtomicBool::new(false),
            }),
        }
    }

    /// Stops the drain task for `key` and discards its pending units.
    pub fn stop(&self, key: &str) {
        if let Some(mut queue) = self.shared.queues.remove(key) {
            debug!(key, discarded = queue.pending.len(), "stopping drain task");
            queue.stop();
        }
    }

    /// Stops every drain task and discards all pending units.
    pub fn shutdown(&self) {
        self.shared.queues.retain(|key, queue| {
            debug!(key, discarded = queue.pending.len(), "stopping drain task");
            queue.stop();
            false
        });
    }

    /// Number of units waiting for `key`.
    pub fn pending(&self, key: &str) -> usize {
        self.shared
            .queues
            .with_existing(key, |queue| queue.pending.len())
            .unwrap_or(0)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.shared.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queues.is_empty()
    }

    /// `None` when the configured rate can never drain anything.
    ///
    /// Rates faster than the timer resolution drain once per millisecond.
    fn drain_period(&self) -> Option<Duration> {
        let leak_rate = self.shared.config.leak_rate;
        if leak_rate.is_nan() || leak_rate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(1.0 / leak_rate)
            .ok()
            .map(|period| period.max(MIN_DRAIN_PERIOD))
    }

    fn spawn_drain(&self, key: &str, generation: u64) -> Option<JoinHandle<()>> {
        let period = self.drain_period()?;
        // A period too long to schedule would never tick anyway.
        let start = Instant::now().checked_add(period)?;
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                if !self.shared.runtime_warned.swap(true, Ordering::Relaxed) {
                    warn!(%err, "no tokio runtime; queues will not drain until one is available");
                }
                return None;
            }
        };
        debug!(key, ?period, generation, "spawning drain task");
        Some(handle.spawn(drain(
            Arc::downgrade(&self.shared),
            key.to_owned(),
            generation,
            start,
            period,
        )))
    }
}

impl Drop for LeakyBucket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drain(
    shared: Weak<Shared>,
    key: String,
    generation: u64,
    start: Instant,
    period: Duration,
) {
    let mut ticks = tokio::time::interval_at(start, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;

        let Some(shared) = shared.upgrade() else {
            break;
        };
        let next = shared
            .queues
            .with_existing(&key, |queue| {
                (queue.generation == generation).then(|| queue.pending.pop_front())
            })
            .flatten();
        drop(shared);

        match next {
            // The key has been torn down, possibly replaced by a newer queue.
            None => break,
            Some(None) => continue,
            Some(Some(Pending { work, done })) => {
                trace!(key, "draining one unit");
                if std::panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                    warn!(key, "queued work panicked");
                }
                let _ = done.send(());
            }
        }
    }
}
