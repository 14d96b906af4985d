use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Per-session time source. Readings are seconds since the session began and never
/// decrease.
pub trait SessionClock: Send {
    fn now(&self) -> f64;
}

/// Wall clock backed by `Instant`.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

impl SessionClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests and replays. Clones share the same reading.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        let current = f64::from_bits(self.bits.load(Ordering::SeqCst));
        let next = seconds.max(current);
        self.bits.store(next.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        let current = f64::from_bits(self.bits.load(Ordering::SeqCst));
        self.set(current + seconds.max(0.0));
    }
}

impl SessionClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
