// ports.rs — Clock & Rand injection surfaces (C17).
//
// Every place the engine needs "now" or a random number goes through one
// of these traits instead of calling chrono::Utc::now()/rand::thread_rng()
// directly, so tests can pin both. Mirrors the teacher's habit of passing
// `now_ms()` around explicitly rather than sampling the clock deep inside
// business logic.
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub trait Rand: Send + Sync {
    /// Returns a jitter in `[0, max_ms]`, inclusive.
    fn jitter_ms(&self, max_ms: u64) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }
}

#[derive(Debug, Default)]
pub struct SystemRand;

impl Rand for SystemRand {
    fn jitter_ms(&self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..=max_ms)
    }
}

/// Deterministic clock for tests. Starts at `start_ms`; `advance` moves it
/// forward explicitly so ladder/cooldown/lifecycle tests can control time
/// without sleeping.
#[derive(Debug)]
pub struct FixedClock {
    now_ms: AtomicU64,
}

impl FixedClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now_ms: AtomicU64::new(start_ms) }
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Deterministic "random" source for tests — always returns a fixed value.
#[derive(Debug)]
pub struct FixedRand(pub u64);

impl Rand for FixedRand {
    fn jitter_ms(&self, max_ms: u64) -> u64 {
        self.0.min(max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_explicitly() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(9_999);
        assert_eq!(clock.now_ms(), 9_999);
    }

    #[test]
    fn fixed_rand_clamps_to_max() {
        let rng = FixedRand(500);
        assert_eq!(rng.jitter_ms(1_000), 500);
        assert_eq!(rng.jitter_ms(100), 100);
    }
}
