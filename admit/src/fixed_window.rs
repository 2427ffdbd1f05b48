use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Clock;

use crate::FixedWindowConfig;
use crate::KeyedStore;
use crate::RateLimitExceeded;
use crate::RateLimiter;
use crate::clock::Timeline;

/// Windows older than this many window sizes are evicted by a sweep.
const SWEEP_TTL_WINDOWS: u64 = 10;

#[derive(Debug)]
struct Window {
    count: u64,
    start: u64,
}

/// A simple window-based limiter.
///
/// Each key's window opens on its first request and hard-resets once
/// `window_size_ms` has elapsed. It is the cheapest engine but is susceptible
/// to "boundary bursts": up to twice the threshold can be admitted in a short
/// span straddling a reset.
#[derive(Debug)]
pub struct FixedWindow {
    config: FixedWindowConfig,
    windows: KeyedStore<Window>,
    calls: AtomicU64,
    timeline: Timeline,
}

impl RateLimiter for FixedWindow {
    fn try_consume(&self, key: &str) -> Result<(), RateLimitExceeded> {
        self.maybe_sweep();

        let now = self.timeline.now_ms();
        let FixedWindowConfig {
            threshold,
            window_size_ms,
            ..
        } = self.config;

        self.windows.with_entry(
            key,
            || Window {
                count: 0,
                start: now,
            },
            |window| {
                if now.saturating_sub(window.start) >= window_size_ms {
                    window.count = 0;
                    window.start = now;
                }

                if window.count >= threshold {
                    let retry_after = (threshold > 0).then(|| {
                        let resets_at = window.start.saturating_add(window_size_ms);
                        Duration::from_millis(resets_at.saturating_sub(now))
                    });
                    return Err(RateLimitExceeded::overloaded(key, retry_after));
                }

                window.count += 1;
                Ok(())
            },
        )
    }
}

impl FixedWindow {
    /// Creates a new `FixedWindow` engine reading the system clock.
    pub fn new(config: FixedWindowConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Creates a new `FixedWindow` engine reading `clock`.
    pub fn with_clock(config: FixedWindowConfig, clock: Clock) -> Self {
        Self {
            config,
            windows: KeyedStore::new(),
            calls: AtomicU64::new(0),
            timeline: Timeline::new(clock),
        }
    }

    /// Removes every key whose window started at least ten window sizes ago.
    pub fn sweep_expired(&self) {
        let now = self.timeline.now_ms();
        let ttl = self.config.window_size_ms.saturating_mul(SWEEP_TTL_WINDOWS);
        self.windows
            .retain(|_, window| now.saturating_sub(window.start) < ttl);
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn maybe_sweep(&self) {
        if let Some(sweep) = self.config.sweep
            && sweep.every_calls > 0
        {
            let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if calls % sweep.every_calls == 0 {
                self.sweep_expired();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use more_asserts::assert_gt;

    use super::*;
    use crate::SweepConfig;

    fn limiter(threshold: u64, window_size_ms: u64) -> (FixedWindow, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        let config = FixedWindowConfig {
            threshold,
            window_size_ms,
            sweep: None,
        };
        (FixedWindow::with_clock(config, clock), mock)
    }

    #[test]
    fn it_rolls_the_window_over() {
        let (rl, mock) = limiter(3, 5_000);

        for _ in 0..3 {
            assert!(rl.try_consume("client").is_ok());
        }
        let err = rl.try_consume("client").unwrap_err();
        assert_eq!(err.key, "client");
        assert_eq!(err.retry_after(), Some(Duration::from_millis(5_000)));

        mock.increment(Duration::from_millis(6_000));

        for _ in 0..3 {
            assert!(rl.try_consume("client").is_ok());
        }
        assert!(rl.try_consume("client").is_err());
    }

    #[test]
    fn it_resets_exactly_at_the_boundary() {
        let (rl, mock) = limiter(1, 50);

        assert!(rl.try_consume("client").is_ok());
        mock.increment(Duration::from_millis(49));
        let err = rl.try_consume("client").unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1)));

        mock.increment(Duration::from_millis(1));
        assert!(rl.try_consume("client").is_ok());
    }

    #[test]
    fn it_allows_a_boundary_burst() {
        let (rl, mock) = limiter(3, 1_000);

        assert!(rl.try_consume("client").is_ok());
        mock.increment(Duration::from_millis(995));

        let mut admitted = 0;
        for _ in 0..10 {
            if rl.try_consume("client").is_ok() {
                admitted += 1;
            }
        }
        mock.increment(Duration::from_millis(5));
        for _ in 0..10 {
            if rl.try_consume("client").is_ok() {
                admitted += 1;
            }
        }

        // Five admissions inside 5ms against a threshold of three.
        assert_eq!(admitted, 5);
        assert_gt!(admitted, 3);
    }

    #[test]
    fn it_keeps_keys_independent() {
        let (rl, _mock) = limiter(1, 1_000);

        assert!(rl.try_consume("a").is_ok());
        assert!(rl.try_consume("a").is_err());
        assert!(rl.try_consume("b").is_ok());
        assert_eq!(rl.len(), 2);
    }

    #[test]
    fn zero_threshold_rejects_everything() {
        let (rl, mock) = limiter(0, 1_000);

        let err = rl.try_consume("client").unwrap_err();
        assert_eq!(err.retry_after(), None);
        mock.increment(Duration::from_secs(60));
        assert!(rl.try_consume("client").is_err());
    }

    #[test]
    fn zero_window_resets_on_every_call() {
        let (rl, _mock) = limiter(1, 0);

        for _ in 0..10 {
            assert!(rl.try_consume("client").is_ok());
        }
    }

    #[test]
    fn it_sweeps_expired_windows_periodically() {
        let (clock, mock) = Clock::mock();
        let rl = FixedWindow::with_clock(
            FixedWindowConfig {
                threshold: 5,
                window_size_ms: 100,
                sweep: Some(SweepConfig { every_calls: 2 }),
            },
            clock,
        );

        assert!(rl.try_consume("stale").is_ok());
        mock.increment(Duration::from_millis(1_000));

        // Second call triggers the sweep before "fresh" is created.
        assert!(rl.try_consume("fresh").is_ok());
        assert_eq!(rl.len(), 1);

        // A window younger than the TTL survives an explicit sweep.
        mock.increment(Duration::from_millis(999));
        rl.sweep_expired();
        assert_eq!(rl.len(), 1);
        mock.increment(Duration::from_millis(1));
        rl.sweep_expired();
        assert!(rl.is_empty());
    }

    #[test]
    fn test_actual_concurrency() {
        use std::thread;

        let capacity = 100;
        let rl = Arc::new(FixedWindow::new(FixedWindowConfig {
            threshold: capacity,
            window_size_ms: 60_000,
            sweep: None,
        }));

        let handles: Vec<_> = (0..capacity + 10)
            .map(|_| {
                let rl = Arc::clone(&rl);
                thread::spawn(move || rl.try_consume("shared"))
            })
            .collect();

        let success_count = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();

        // Even with multiple threads, exactly 'capacity' should pass
        assert_eq!(success_count as u64, capacity);
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
