use quanta::Clock;
use quanta::Instant;

/// Millisecond timestamps relative to the moment an engine was built.
#[derive(Debug, Clone)]
pub(crate) struct Timeline {
    clock: Clock,
    anchor: Instant,
}

impl Timeline {
    pub(crate) fn new(clock: Clock) -> Self {
        let anchor = clock.now();
        Self { clock, anchor }
    }

    #[inline]
    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_millis() as u64
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(Clock::new())
    }
}
