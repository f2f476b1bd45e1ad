//! Fleet-wide rate and concurrency limits.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

use super::gate::CountingGate;
use super::window::RateWindow;

/// Fleet-wide safety valve: one window and one gate shared by every
/// account, capping aggregate throughput and aggregate in-flight work even
/// when each account is within its own budget.
pub struct GlobalLimiter {
    /// Aggregate send-rate window
    pub(crate) window: Mutex<RateWindow>,
    /// Aggregate in-flight permits
    pub(crate) gate: CountingGate,
}

/// Point-in-time view of the fleet-wide limiter, for display only.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    /// Aggregate admission rate over the trailing window, in events per second
    pub current_rate: f64,
    /// Time until the window frees a slot
    pub wait_time: Duration,
    /// Concurrency permits not currently held
    pub concurrency_available: usize,
}

impl GlobalLimiter {
    /// Create a limiter admitting `rate_capacity` sends per `window` and
    /// `max_concurrency` in-flight sends across the whole fleet.
    pub fn new(rate_capacity: usize, window: Duration, max_concurrency: usize) -> Self {
        Self {
            window: Mutex::new(RateWindow::new(rate_capacity, window)),
            gate: CountingGate::new(max_concurrency),
        }
    }

    /// Admit one send if the fleet-wide window has capacity.
    pub fn try_rate(&self) -> bool {
        self.try_rate_at(Instant::now())
    }

    pub(crate) fn try_rate_at(&self, now: Instant) -> bool {
        self.window.lock().try_acquire_at(now)
    }

    /// Take one fleet-wide in-flight permit. Non-blocking.
    pub fn try_concurrency(&self) -> bool {
        self.gate.try_acquire()
    }

    /// Return one fleet-wide in-flight permit.
    pub fn release_concurrency(&self) {
        if !self.gate.release() {
            warn!("Global concurrency release without matching acquire");
        }
    }

    /// Point-in-time stats for display.
    pub fn stats(&self) -> GlobalStats {
        self.stats_at(Instant::now())
    }

    pub(crate) fn stats_at(&self, now: Instant) -> GlobalStats {
        let mut window = self.window.lock();
        GlobalStats {
            current_rate: window.current_rate_at(now),
            wait_time: window.wait_time_at(now),
            concurrency_available: self.gate.available(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_window_caps_admissions() {
        let limiter = GlobalLimiter::new(2, Duration::from_secs(60), 5);
        let now = Instant::now();

        assert!(limiter.try_rate_at(now));
        assert!(limiter.try_rate_at(now));
        assert!(!limiter.try_rate_at(now));
    }

    #[test]
    fn test_rate_recovers_after_window() {
        let limiter = GlobalLimiter::new(1, Duration::from_secs(10), 5);
        let start = Instant::now();

        assert!(limiter.try_rate_at(start));
        assert!(!limiter.try_rate_at(start));
        assert!(limiter.try_rate_at(start + Duration::from_secs(11)));
    }

    #[test]
    fn test_concurrency_pairing() {
        let limiter = GlobalLimiter::new(100, Duration::from_secs(60), 1);

        assert!(limiter.try_concurrency());
        assert!(!limiter.try_concurrency());
        limiter.release_concurrency();
        assert!(limiter.try_concurrency());
    }

    #[test]
    fn test_stats_snapshot() {
        let limiter = GlobalLimiter::new(4, Duration::from_secs(60), 3);
        let now = Instant::now();

        limiter.try_rate_at(now);
        limiter.try_concurrency();

        let stats = limiter.stats_at(now);
        assert!((stats.current_rate - 1.0 / 60.0).abs() < f64::EPSILON);
        assert_eq!(stats.wait_time, Duration::ZERO);
        assert_eq!(stats.concurrency_available, 2);
    }
}
