use std::collections::VecDeque;
use std::time::Duration;

use quanta::Clock;

use crate::KeyedStore;
use crate::RateLimitExceeded;
use crate::RateLimiter;
use crate::WindowConfig;
use crate::clock::Timeline;

/// An exact sliding window.
///
/// Every admitted request's timestamp is kept until it falls out of the
/// trailing window, so at most `threshold` timestamps are retained per key.
/// Pruning happens lazily, on the next request for the same key.
#[derive(Debug)]
pub struct SlidingLog {
    config: WindowConfig,
    logs: KeyedStore<VecDeque<u64>>,
    timeline: Timeline,
}

impl RateLimiter for SlidingLog {
    fn try_consume(&self, key: &str) -> Result<(), RateLimitExceeded> {
        let now = self.timeline.now_ms();
        let WindowConfig {
            threshold,
            window_size_ms,
        } = self.config;
        let window_start = now.saturating_sub(window_size_ms);

        self.logs.with_entry(key, VecDeque::new, |log| {
            prune(log, window_start);

            if log.len() as u64 >= threshold {
                // The oldest entry leaves once the window starts strictly after it.
                let retry_after = log.front().filter(|_| threshold > 0).map(|oldest| {
                    let leaves_at = oldest.saturating_add(window_size_ms).saturating_add(1);
                    Duration::from_millis(leaves_at.saturating_sub(now))
                });
                return Err(RateLimitExceeded::overloaded(key, retry_after));
            }

            log.push_back(now);
            Ok(())
        })
    }
}

impl SlidingLog {
    pub fn new(config: WindowConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    pub fn with_clock(config: WindowConfig, clock: Clock) -> Self {
        Self {
            config,
            logs: KeyedStore::new(),
            timeline: Timeline::new(clock),
        }
    }

    /// Prunes every log and forgets keys with nothing left inside the window.
    pub fn cleanup(&self) {
        let window_start = self
            .timeline
            .now_ms()
            .saturating_sub(self.config.window_size_ms);
        self.logs.retain(|_, log| {
            prune(log, window_start);
            !log.is_empty()
        });
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// Timestamps are appended in order, so expired ones are always at the front.
fn prune(log: &mut VecDeque<u64>, window_start: u64) {
    while log.front().is_some_and(|&ts| ts < window_start) {
        log.pop_front();
    }
}
