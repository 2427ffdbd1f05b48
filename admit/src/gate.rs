use std::ops::ControlFlow;
use std::sync::Arc;

use crate::RateLimitExceeded;
use crate::RateLimiter;

/// Turns a synchronous engine's result into an admit/reject signal.
///
/// `ControlFlow::Continue` means the request may proceed; `ControlFlow::Break`
/// carries the rejection for the transport layer to report.
#[derive(Debug, Clone)]
pub struct Gate {
    limiter: Arc<dyn RateLimiter>,
}

impl Gate {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }

    #[inline]
    pub fn admit(&self, key: &str) -> ControlFlow<RateLimitExceeded> {
        match self.limiter.try_consume(key) {
            Ok(()) => ControlFlow::Continue(()),
            Err(rejection) => ControlFlow::Break(rejection),
        }
    }
}
