use std::time::Duration;

use quanta::Clock;

use crate::KeyedStore;
use crate::RateLimitExceeded;
use crate::RateLimiter;
use crate::WindowConfig;
use crate::clock::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counter {
    count: u64,
    start: u64,
}

impl Counter {
    fn fresh(start: u64) -> Self {
        Self { count: 0, start }
    }
}

#[derive(Debug)]
struct Windows {
    current: Counter,
    previous: Option<Counter>,
}

/// A Sliding Window Counter implementation.
///
/// It maintains a count for the current clock-aligned window and the previous
/// one. The effective count is: floor(previous_count * %_of_window_left) +
/// current_count. The previous count only contributes when it belongs to the
/// window immediately before the current one.
#[derive(Debug)]
pub struct SlidingWindow {
    config: WindowConfig,
    windows: KeyedStore<Windows>,
    timeline: Timeline,
}

impl RateLimiter for SlidingWindow {
    fn try_consume(&self, key: &str) -> Result<(), RateLimitExceeded> {
        let now = self.timeline.now_ms();
        let current_start = self.window_start(now);

        self.windows.with_entry(
            key,
            || Windows {
                current: Counter::fresh(current_start),
                previous: None,
            },
            |windows| {
                // 1. Slide: archive the old current window
                if windows.current.start != current_start {
                    windows.previous = Some(windows.current);
                    windows.current = Counter::fresh(current_start);
                }

                // 2. Calculate the rate as if this request were admitted
                let rate = windows.current.count
                    + 1
                    + self.weighted_previous(windows.previous, now, current_start);

                if rate > self.config.threshold {
                    return Err(RateLimitExceeded::overloaded(
                        key,
                        self.retry_after(now, current_start),
                    ));
                }

                windows.current.count += 1;
                Ok(())
            },
        )
    }
}

impl SlidingWindow {
    pub fn new(config: WindowConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    pub fn with_clock(config: WindowConfig, clock: Clock) -> Self {
        Self {
            config,
            windows: KeyedStore::new(),
            timeline: Timeline::new(clock),
        }
    }

    /// Discards windows that can no longer contribute to a rate.
    ///
    /// A current window that has just gone stale becomes the previous window;
    /// anything older than one window behind the current boundary is dropped,
    /// along with keys left with nothing relevant.
    pub fn cleanup(&self) {
        let now = self.timeline.now_ms();
        let current_start = self.window_start(now);
        let previous_start = current_start.saturating_sub(self.config.window_size_ms);

        self.windows.retain(|_, windows| {
            if windows.current.start < current_start {
                windows.previous = Some(windows.current);
                windows.current = Counter::fresh(current_start);
            }
            if windows
                .previous
                .is_some_and(|previous| previous.start < previous_start)
            {
                windows.previous = None;
            }
            windows.previous.is_some() || windows.current.count > 0
        });
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    #[inline]
    fn window_start(&self, now: u64) -> u64 {
        match self.config.window_size_ms {
            0 => now,
            size => (now / size) * size,
        }
    }

    /// floor(previous.count * overlap / window) in integer arithmetic.
    fn weighted_previous(&self, previous: Option<Counter>, now: u64, current_start: u64) -> u64 {
        let size = self.config.window_size_ms;
        match previous {
            Some(previous) if size > 0 && previous.start.checked_add(size) == Some(current_start) => {
                let overlap = size - (now - current_start);
                ((previous.count as u128 * overlap as u128) / size as u128) as u64
            }
            _ => 0,
        }
    }

    /// The next window boundary, after which the current count stops counting in full.
    fn retry_after(&self, now: u64, current_start: u64) -> Option<Duration> {
        if self.config.threshold == 0 {
            return None;
        }
        let next = current_start.saturating_add(self.config.window_size_ms.max(1));
        Some(Duration::from_millis(next.saturating_sub(now)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use more_asserts::assert_ge;
    use more_asserts::assert_lt;

    use super::*;

    fn limiter(threshold: u64, window_size_ms: u64) -> (SlidingWindow, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        let config = WindowConfig {
            threshold,
            window_size_ms,
        };
        (SlidingWindow::with_clock(config, clock), mock)
    }

    fn drain(rl: &SlidingWindow, key: &str) -> usize {
        let mut admitted = 0;
        while rl.try_consume(key).is_ok() {
            admitted += 1;
        }
        admitted
    }

    #[test]
    fn it_enforces_the_threshold_within_a_window() {
        let (rl, _mock) = limiter(100, 1_000);
        assert_eq!(drain(&rl, "client"), 100);
    }

    #[test]
    fn it_interpolates_the_previous_window() {
        let (rl, mock) = limiter(10, 1_000);

        for _ in 0..8 {
            assert!(rl.try_consume("client").is_ok());
        }

        // Halfway into the next window: 0 + 1 + floor(8 * 0.5) = 5 <= 10.
        mock.increment(Duration::from_millis(1_500));
        assert!(rl.try_consume("client").is_ok());

        // 5 more fit: 6 + floor(8 * 0.5) = 10.
        assert_eq!(drain(&rl, "client"), 5);
    }

    #[test]
    fn test_sliding_window_prevents_double_burst() {
        let (rl, mock) = limiter(100, 100);

        // Fill Window A
        assert_eq!(drain(&rl, "client"), 100);

        // Exactly on the boundary the previous window still weighs in full.
        mock.increment(Duration::from_millis(100));
        assert!(rl.try_consume("client").is_err());

        // Move slightly into Window B: weight is 0.8, so ~20 more fit, not 100.
        mock.increment(Duration::from_millis(20));
        let extra = drain(&rl, "client");
        assert_eq!(extra, 20);
        assert_lt!(extra, 50, "Should not allow a full second burst immediately");
    }

    #[test]
    fn it_recovers_capacity_as_the_previous_window_slides_away() {
        let (rl, mock) = limiter(100, 100);

        assert_eq!(drain(&rl, "client"), 100);

        mock.increment(Duration::from_millis(160));
        assert_ge!(
            drain(&rl, "client"),
            60,
            "Should have recovered capacity from the PREVIOUS window"
        );
    }

    #[test]
    fn test_sliding_window_long_idle() {
        let (rl, mock) = limiter(10, 10);

        assert_eq!(drain(&rl, "client"), 10);

        // A stale previous window is archived but never interpolated.
        mock.increment(Duration::from_millis(100));
        assert_eq!(drain(&rl, "client"), 10);
    }

    #[test]
    fn zero_window_counts_per_instant() {
        let (rl, mock) = limiter(2, 0);

        assert_eq!(drain(&rl, "client"), 2);
        let err = rl.try_consume("client").unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1)));

        mock.increment(Duration::from_millis(1));
        assert_eq!(drain(&rl, "client"), 2);
    }

    #[test]
    fn zero_threshold_rejects_everything() {
        let (rl, _mock) = limiter(0, 1_000);

        let err = rl.try_consume("client").unwrap_err();
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn cleanup_folds_and_discards_windows() {
        let (rl, mock) = limiter(10, 1_000);

        assert!(rl.try_consume("client").is_ok());

        // The current window has just gone stale: it survives as the previous one.
        mock.increment(Duration::from_millis(1_500));
        rl.cleanup();
        assert_eq!(rl.len(), 1);
        // floor(1 * 0.5) contributes nothing.
        assert_eq!(drain(&rl, "client"), 10);

        // Two windows later nothing is relevant any more.
        mock.increment(Duration::from_millis(2_000));
        rl.cleanup();
        assert!(rl.is_empty());
    }

    #[test]
    fn test_sliding_window_concurrency() {
        use std::thread;

        let capacity = 100;
        let rl = Arc::new(SlidingWindow::new(WindowConfig {
            threshold: capacity,
            window_size_ms: 60_000,
        }));

        let handles: Vec<_> = (0..capacity + 20)
            .map(|_| {
                let rl = Arc::clone(&rl);
                thread::spawn(move || rl.try_consume("shared"))
            })
            .collect();

        let success_count = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count() as u64;

        // A real clock may cross a window boundary mid-test, which can only
        // lower the count through interpolation, never raise it.
        assert!(success_count <= capacity);
        assert_ge!(success_count, 1);
    }

    #[test]
    fn it_hints_without_overflow_for_huge_windows() {
        let (rl, mock) = limiter(1, u64::MAX);

        mock.increment(Duration::from_millis(5));
        assert!(rl.try_consume("client").is_ok());
        let err = rl.try_consume("client").unwrap_err();
        assert_eq!(
            err.retry_after(),
            Some(Duration::from_millis(u64::MAX - 5))
        );
    }
}
