//! Engine configuration.
//!
//! Every value, including zero, is accepted. Zero thresholds, capacities and
//! rates produce the most restrictive behaviour the engine can express rather
//! than an error.

use crate::Engine;
use crate::FixedWindow;
use crate::LeakyBucket;
use crate::SlidingLog;
use crate::SlidingWindow;
use crate::TokenBucket;

/// Threshold and window shared by the window based engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct WindowConfig {
    /// Maximum number of requests admitted per window.
    pub threshold: u64,
    pub window_size_ms: u64,
}

/// Configuration for [`FixedWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct FixedWindowConfig {
    /// Maximum number of requests admitted per window.
    pub threshold: u64,
    pub window_size_ms: u64,
    /// Periodically evict keys whose window has long expired.
    #[cfg_attr(feature = "serde", serde(default))]
    pub sweep: Option<SweepConfig>,
}

/// Triggers an expiry sweep every `every_calls` admission attempts.
///
/// A sweep removes every key whose window started at least ten window sizes
/// ago. `every_calls = 0` disables sweeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SweepConfig {
    pub every_calls: u64,
}

/// Configuration for [`TokenBucket`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TokenBucketConfig {
    /// Maximum number of tokens a bucket holds. New buckets start full.
    pub capacity: f64,
    /// Tokens taken by each admitted request.
    pub consume_per_request: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
}

/// Configuration for [`LeakyBucket`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LeakyBucketConfig {
    /// Maximum number of units waiting in a key's queue.
    pub capacity: usize,
    /// Units drained per second. Zero means the queue never drains.
    pub leak_rate: f64,
}

/// Selects and configures one engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "algorithm", rename_all = "camelCase")
)]
pub enum LimiterConfig {
    FixedWindow(FixedWindowConfig),
    SlidingLog(WindowConfig),
    SlidingWindow(WindowConfig),
    TokenBucket(TokenBucketConfig),
    LeakyBucket(LeakyBucketConfig),
}

impl LimiterConfig {
    /// Builds the configured engine with a real clock.
    pub fn build(self) -> Engine {
        match self {
            LimiterConfig::FixedWindow(config) => FixedWindow::new(config).into(),
            LimiterConfig::SlidingLog(config) => SlidingLog::new(config).into(),
            LimiterConfig::SlidingWindow(config) => SlidingWindow::new(config).into(),
            LimiterConfig::TokenBucket(config) => TokenBucket::new(config).into(),
            LimiterConfig::LeakyBucket(config) => LeakyBucket::new(config).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_builds_the_selected_engine() {
        let sync = LimiterConfig::SlidingWindow(WindowConfig {
            threshold: 1,
            window_size_ms: 1_000,
        })
        .build();
        assert!(matches!(sync, Engine::Synchronous(_)));

        let queueing = LimiterConfig::LeakyBucket(LeakyBucketConfig {
            capacity: 1,
            leak_rate: 1.0,
        })
        .build();
        assert!(matches!(queueing, Engine::Queueing(_)));
    }

    #[test]
    fn every_configuration_builds_a_working_engine() {
        let window = WindowConfig {
            threshold: 1,
            window_size_ms: 60_000,
        };
        let synchronous = [
            LimiterConfig::FixedWindow(FixedWindowConfig {
                threshold: 1,
                window_size_ms: 60_000,
                sweep: None,
            }),
            LimiterConfig::SlidingLog(window),
            LimiterConfig::SlidingWindow(window),
            LimiterConfig::TokenBucket(TokenBucketConfig {
                capacity: 1.0,
                consume_per_request: 1.0,
                refill_rate: 0.0,
            }),
        ];

        for config in synchronous {
            let engine = config.build();
            assert_eq!(engine.kind(), "synchronous");
            let Engine::Synchronous(limiter) = engine else {
                panic!("{config:?} built a queueing engine");
            };
            assert!(limiter.try_consume("client").is_ok(), "{config:?}");
            assert!(limiter.try_consume("client").is_err(), "{config:?}");
            assert!(limiter.try_consume("other").is_ok(), "{config:?}");
        }

        let engine = LimiterConfig::LeakyBucket(LeakyBucketConfig {
            capacity: 1,
            leak_rate: 1.0,
        })
        .build();
        assert_eq!(engine.kind(), "queueing");
        assert!(engine.gate().is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn it_reads_tagged_configuration() {
        let config: LimiterConfig = serde_json::from_str(
            r#"{ "algorithm": "fixedWindow", "threshold": 3, "windowSizeMs": 5000 }"#,
        )
        .unwrap();
        assert_eq!(
            config,
            LimiterConfig::FixedWindow(FixedWindowConfig {
                threshold: 3,
                window_size_ms: 5_000,
                sweep: None,
            })
        );

        let config: LimiterConfig = serde_json::from_str(
            r#"{
                "algorithm": "tokenBucket",
                "capacity": 100,
                "consumePerRequest": 1,
                "refillRate": 10
            }"#,
        )
        .unwrap();
        assert_eq!(
            config,
            LimiterConfig::TokenBucket(TokenBucketConfig {
                capacity: 100.0,
                consume_per_request: 1.0,
                refill_rate: 10.0,
            })
        );

        let config: LimiterConfig = serde_json::from_str(
            r#"{ "algorithm": "fixedWindow", "threshold": 1, "windowSizeMs": 10, "sweep": { "everyCalls": 100 } }"#,
        )
        .unwrap();
        assert!(matches!(
            config,
            LimiterConfig::FixedWindow(FixedWindowConfig {
                sweep: Some(SweepConfig { every_calls: 100 }),
                ..
            })
        ));
    }
}
