//! Session clock.
//!
//! Move timestamps must come from a clock that agrees with the authority's,
//! otherwise the client's queue pruning compares times from two different
//! origins. The authority reads a [`SyncedClock`] with zero offset; clients
//! estimate their offset from `TimeRequest`/`TimeResponse` round trips.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use tracing::debug;

/// Server-synchronised monotonic time in seconds.
pub trait SessionClock {
    fn now(&self) -> f64;
}

/// Local monotonic clock shifted onto the authority's time line.
#[derive(Debug)]
pub struct SyncedClock {
    epoch: Instant,
    offset: f64,
    best_rtt: Option<f64>,
    last_reported: AtomicU64,
}

impl Default for SyncedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncedClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset: 0.0,
            best_rtt: None,
            last_reported: AtomicU64::new(f64::MIN.to_bits()),
        }
    }

    /// Seconds since this clock was created, without the offset.
    pub fn local_now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn best_rtt(&self) -> Option<f64> {
        self.best_rtt
    }

    /// Folds in one round trip. `client_sent` and `client_received` are
    /// [`SyncedClock::local_now`] readings; `server_time` is the
    /// authority's clock when it answered.
    ///
    /// Only the lowest-RTT sample is kept. Returns whether the offset changed.
    pub fn apply_sample(&mut self, client_sent: f64, server_time: f64, client_received: f64) -> bool {
        let rtt = (client_received - client_sent).max(0.0);
        if self.best_rtt.is_some_and(|best| rtt >= best) {
            return false;
        }
        self.best_rtt = Some(rtt);
        self.offset = server_time + rtt * 0.5 - client_received;
        debug!(rtt, offset = self.offset, "Session clock resynchronised");
        true
    }
}

impl SessionClock for SyncedClock {
    fn now(&self) -> f64 {
        // Offset updates may step backwards; hold at the last reading instead.
        let last = f64::from_bits(self.last_reported.load(Ordering::Relaxed));
        let now = (self.local_now() + self.offset).max(last);
        self.last_reported.store(now.to_bits(), Ordering::Relaxed);
        now
    }
}

/// Clock advanced by hand. Used by deterministic harnesses and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }

    pub fn set(&self, seconds: f64) {
        self.now.store(seconds.to_bits(), Ordering::Relaxed);
    }
}

impl SessionClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.now.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_lowest_rtt_sample() {
        let mut clock = SyncedClock::new();
        assert!(clock.apply_sample(1.0, 11.0, 1.2));
        assert!((clock.offset() - 9.9).abs() < 1e-9);

        // Worse round trip is ignored.
        assert!(!clock.apply_sample(2.0, 50.0, 2.5));
        assert!((clock.offset() - 9.9).abs() < 1e-9);

        assert!(clock.apply_sample(3.0, 13.0, 3.1));
        assert!((clock.offset() - 9.95).abs() < 1e-9);
        assert!((clock.best_rtt().unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn never_runs_backwards() {
        let mut clock = SyncedClock::new();
        clock.apply_sample(0.0, 100.0, 0.0);
        let before = clock.now();
        // Force a backwards offset step.
        clock.offset = -100.0;
        assert!(clock.now() >= before);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(5.0);
        clock.advance(0.25);
        assert_eq!(clock.now(), 5.25);
        clock.set(1.0);
        assert_eq!(clock.now(), 1.0);
    }
}
