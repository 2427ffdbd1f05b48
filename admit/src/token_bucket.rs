use std::time::Duration;

use quanta::Clock;

use crate::KeyedStore;
use crate::RateLimitExceeded;
use crate::RateLimiter;
use crate::TokenBucketConfig;
use crate::clock::Timeline;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: u64,
}

/// A continuously refilled token pool per key.
///
/// A bucket is full when its key is first seen, so a burst of up to `capacity`
/// requests is admitted immediately. After that the key is throttled to
/// `refill_rate / consume_per_request` requests per second. Refill is lazy: it
/// is computed from the elapsed time on every access, admitted or not.
///
/// Buckets are kept for every key ever seen.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    buckets: KeyedStore<Bucket>,
    timeline: Timeline,
}

impl RateLimiter for TokenBucket {
    fn try_consume(&self, key: &str) -> Result<(), RateLimitExceeded> {
        let now = self.timeline.now_ms();
        let TokenBucketConfig {
            capacity,
            consume_per_request,
            refill_rate,
        } = self.config;

        self.buckets.with_entry(
            key,
            || Bucket {
                tokens: capacity,
                last_refill: now,
            },
            |bucket| {
                let elapsed_ms = now.saturating_sub(bucket.last_refill);
                bucket.tokens =
                    (bucket.tokens + elapsed_ms as f64 * refill_rate / 1_000.0).min(capacity);
                bucket.last_refill = now;

                if bucket.tokens < consume_per_request {
                    return Err(RateLimitExceeded::overloaded(
                        key,
                        self.retry_after(bucket.tokens),
                    ));
                }

                bucket.tokens -= consume_per_request;
                Ok(())
            },
        )
    }
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    pub fn with_clock(config: TokenBucketConfig, clock: Clock) -> Self {
        Self {
            config,
            buckets: KeyedStore::new(),
            timeline: Timeline::new(clock),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Time until `consume_per_request` tokens are available, if they ever will be.
    fn retry_after(&self, tokens: f64) -> Option<Duration> {
        let TokenBucketConfig {
            capacity,
            consume_per_request,
            refill_rate,
        } = self.config;
        if refill_rate <= 0.0 || consume_per_request > capacity {
            return None;
        }
        Duration::try_from_secs_f64((consume_per_request - tokens) / refill_rate).ok()
    }
}
