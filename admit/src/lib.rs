//! # admit
//!
//! `admit` provides keyed request admission control: every request carries a key
//! (typically the client identity) and each key is rate limited independently by
//! one of several interchangeable engines.
//!
//! ## Engines
//!
//! * [`FixedWindow`]: counts requests in a window that starts on the first request
//!   of a key and hard-resets once it has elapsed. Cheapest, but allows up to twice
//!   the threshold across a window boundary.
//! * [`SlidingLog`]: keeps every admitted timestamp inside the trailing window.
//!   Exact, at the cost of up to `threshold` entries per key.
//! * [`SlidingWindow`]: blends the current and previous clock-aligned window counts
//!   to approximate the sliding log with two counters per key.
//! * [`TokenBucket`]: a continuously refilled pool of tokens per key. Allows bursts
//!   up to the capacity, then throttles to the refill rate.
//! * [`LeakyBucket`]: a bounded FIFO queue per key drained at a fixed rate by a
//!   background task. The only engine that defers work rather than rejecting it.
//!
//! ## Contracts
//!
//! The synchronous engines implement [`RateLimiter`]; the leaky bucket implements
//! [`QueueingLimiter`]. [`Engine`] tags an engine with the contract it exposes so
//! that a transport adapter can pick the call path with a `match`.
//!
//! ## Example
//!
//! ```rust
//! use admit::FixedWindow;
//! use admit::FixedWindowConfig;
//! use admit::RateLimiter;
//!
//! let limiter = FixedWindow::new(FixedWindowConfig {
//!     threshold: 2,
//!     window_size_ms: 1_000,
//!     sweep: None,
//! });
//!
//! assert!(limiter.try_consume("10.0.0.1").is_ok());
//! assert!(limiter.try_consume("10.0.0.1").is_ok());
//! assert!(limiter.try_consume("10.0.0.1").is_err());
//! assert!(limiter.try_consume("10.0.0.2").is_ok());
//! ```

use std::fmt::Debug;
use std::sync::Arc;

mod clock;
mod config;
mod error;
mod fixed_window;
mod gate;
mod leaky_bucket;
mod sliding_log;
mod sliding_window;
mod store;
mod token_bucket;

pub use config::FixedWindowConfig;
pub use config::LeakyBucketConfig;
pub use config::LimiterConfig;
pub use config::SweepConfig;
pub use config::TokenBucketConfig;
pub use config::WindowConfig;
pub use error::Closed;
pub use error::RateLimitExceeded;
pub use error::Reason;
pub use fixed_window::FixedWindow;
pub use gate::Gate;
pub use leaky_bucket::LeakyBucket;
pub use leaky_bucket::Ticket;
pub use leaky_bucket::Work;
pub use sliding_log::SlidingLog;
pub use sliding_window::SlidingWindow;
pub use store::KeyedStore;
pub use token_bucket::TokenBucket;

/// The synchronous admission contract.
///
/// Implementations must be `Send` and `Sync` so that a single engine can be
/// shared across tasks via `Arc`, and every call must complete without blocking.
pub trait RateLimiter: Debug + Send + Sync {
    /// Attempts to admit one request for `key`.
    ///
    /// The whole check-then-mutate sequence for a key runs as one critical
    /// section, so concurrent callers can never admit more than the engine allows.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] if the key has no remaining allowance.
    fn try_consume(&self, key: &str) -> Result<(), RateLimitExceeded>;
}

/// The queueing admission contract.
///
/// Accepted work is never dropped silently: it runs in FIFO order per key, or
/// its [`Ticket`] resolves to [`Closed`] when the engine is torn down.
pub trait QueueingLimiter: Debug + Send + Sync {
    /// Queues `work` for `key`.
    ///
    /// `Ok` means the unit was accepted. Await the returned [`Ticket`] to learn
    /// when the unit has actually been executed.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] with [`Reason::QueueFull`] if the key's queue
    /// is at capacity.
    fn enqueue(&self, key: &str, work: Work) -> Result<Ticket, RateLimitExceeded>;
}

/// An engine tagged with the contract it exposes.
#[derive(Debug, Clone)]
pub enum Engine {
    Synchronous(Arc<dyn RateLimiter>),
    Queueing(Arc<dyn QueueingLimiter>),
}

impl Engine {
    /// A short, stable label for the contract, suitable for metric attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            Engine::Synchronous(_) => "synchronous",
            Engine::Queueing(_) => "queueing",
        }
    }

    /// A synchronous admission gate over this engine, if it is synchronous.
    pub fn gate(&self) -> Option<Gate> {
        match self {
            Engine::Synchronous(limiter) => Some(Gate::new(Arc::clone(limiter))),
            Engine::Queueing(_) => None,
        }
    }
}

macro_rules! synchronous_engine {
    ($($engine:ty),* $(,)?) => {
        $(
            impl From<$engine> for Engine {
                fn from(engine: $engine) -> Self {
                    Engine::Synchronous(Arc::new(engine))
                }
            }
        )*
    };
}

synchronous_engine!(FixedWindow, SlidingLog, SlidingWindow, TokenBucket);

impl From<LeakyBucket> for Engine {
    fn from(engine: LeakyBucket) -> Self {
        Engine::Queueing(Arc::new(engine))
    }
}
