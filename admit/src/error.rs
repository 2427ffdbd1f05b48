use std::time::Duration;

/// Why a request was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Reason {
    /// A synchronous engine has no remaining allowance for the key.
    ///
    /// `retry_after` hints when the key may next be admitted. It is `None` when
    /// the configuration means the key will never be admitted again.
    #[error("limit reached")]
    Overloaded { retry_after: Option<Duration> },

    /// The key's leaky bucket queue already holds `capacity` units.
    #[error("queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

/// The only failure an engine reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded for key `{key}`: {reason}")]
pub struct RateLimitExceeded {
    /// The key that was refused.
    pub key: String,
    pub reason: Reason,
}

impl RateLimitExceeded {
    pub(crate) fn overloaded(key: &str, retry_after: Option<Duration>) -> Self {
        Self {
            key: key.to_owned(),
            reason: Reason::Overloaded { retry_after },
        }
    }

    pub(crate) fn queue_full(key: &str, capacity: usize) -> Self {
        Self {
            key: key.to_owned(),
            reason: Reason::QueueFull { capacity },
        }
    }

    /// The retry hint, if the engine could compute one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.reason {
            Reason::Overloaded { retry_after } => retry_after,
            Reason::QueueFull { .. } => None,
        }
    }

    pub fn is_queue_full(&self) -> bool {
        matches!(self.reason, Reason::QueueFull { .. })
    }
}

/// Queued work was discarded because its leaky bucket was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("leaky bucket was torn down before the queued work ran")]
pub struct Closed;
