//! Per-account rate and concurrency limits.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use super::gate::CountingGate;
use super::window::RateWindow;
use super::AccountId;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Rate and concurrency limits for one sending account.
///
/// Three trailing windows (minute, hour, day) sit behind a single mutex so
/// an admission either charges all three or none of them. The concurrency
/// gate is independent of the windows and lock-free.
pub struct AccountLimiter {
    /// The account this limiter is scoped to
    account_id: AccountId,
    /// Minute, hour, and day windows, committed together
    windows: Mutex<AccountWindows>,
    /// In-flight send permits for this account
    gate: CountingGate,
    /// When this account last had a send admitted
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

struct AccountWindows {
    minute: RateWindow,
    hour: RateWindow,
    day: RateWindow,
}

/// Point-in-time view of an account's limiter, for display only.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStats {
    /// Admission rate over the trailing minute, in events per second
    pub current_rate: f64,
    /// Time until the most constrained window frees a slot
    pub wait_time: Duration,
    /// When this account last had a send admitted
    pub last_activity: Option<DateTime<Utc>>,
    /// Concurrency permits not currently held
    pub concurrency_available: usize,
}

impl AccountLimiter {
    /// Create a limiter admitting `per_minute`/`per_hour`/`per_day` sends
    /// across its windows and `max_concurrency` in-flight sends.
    pub fn new(
        account_id: AccountId,
        per_minute: usize,
        per_hour: usize,
        per_day: usize,
        max_concurrency: usize,
    ) -> Self {
        Self {
            account_id,
            windows: Mutex::new(AccountWindows {
                minute: RateWindow::new(per_minute, MINUTE),
                hour: RateWindow::new(per_hour, HOUR),
                day: RateWindow::new(per_day, DAY),
            }),
            gate: CountingGate::new(max_concurrency),
            last_activity: Mutex::new(None),
        }
    }

    /// The account this limiter is scoped to.
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Admit one send if the minute, hour, and day windows all have
    /// capacity; charges all three or none.
    pub fn try_rate(&self) -> bool {
        self.try_rate_at(Instant::now())
    }

    pub(crate) fn try_rate_at(&self, now: Instant) -> bool {
        let mut windows = self.windows.lock();

        let admitted = windows.minute.has_capacity_at(now)
            && windows.hour.has_capacity_at(now)
            && windows.day.has_capacity_at(now);

        if admitted {
            windows.minute.record_at(now);
            windows.hour.record_at(now);
            windows.day.record_at(now);
            *self.last_activity.lock() = Some(Utc::now());
        } else {
            trace!(account_id = self.account_id, "Account rate window full");
        }

        admitted
    }

    /// Take one in-flight permit. Non-blocking.
    pub fn try_concurrency(&self) -> bool {
        self.gate.try_acquire()
    }

    /// Return one in-flight permit.
    ///
    /// An unmatched release is a caller bug; the gate stays at zero and the
    /// violation is logged.
    pub fn release_concurrency(&self) {
        if !self.gate.release() {
            warn!(
                account_id = self.account_id,
                "Concurrency release without matching acquire"
            );
        }
    }

    /// Point-in-time stats for display.
    pub fn stats(&self) -> AccountStats {
        self.stats_at(Instant::now())
    }

    pub(crate) fn stats_at(&self, now: Instant) -> AccountStats {
        let mut windows = self.windows.lock();
        let wait_time = windows
            .minute
            .wait_time_at(now)
            .max(windows.hour.wait_time_at(now))
            .max(windows.day.wait_time_at(now));

        AccountStats {
            current_rate: windows.minute.current_rate_at(now),
            wait_time,
            last_activity: *self.last_activity.lock(),
            concurrency_available: self.gate.available(),
        }
    }

    /// When this account last had a send admitted.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.lock()
    }

    /// Number of events retained in the minute window.
    #[cfg(test)]
    pub(crate) fn minute_count_at(&self, now: Instant) -> usize {
        self.windows.lock().minute.count_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_within_all_windows() {
        let limiter = AccountLimiter::new(1, 5, 100, 1000, 2);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.try_rate_at(now));
        }
        assert!(!limiter.try_rate_at(now));
    }

    #[test]
    fn test_tightest_window_wins() {
        // Hour budget smaller than minute budget
        let limiter = AccountLimiter::new(1, 10, 2, 1000, 2);
        let now = Instant::now();

        assert!(limiter.try_rate_at(now));
        assert!(limiter.try_rate_at(now));
        assert!(!limiter.try_rate_at(now));
    }

    #[test]
    fn test_denial_charges_no_window() {
        let limiter = AccountLimiter::new(1, 10, 2, 1000, 2);
        let now = Instant::now();

        limiter.try_rate_at(now);
        limiter.try_rate_at(now);

        // Hour window is full; the minute window must not be charged
        assert!(!limiter.try_rate_at(now));
        assert_eq!(limiter.minute_count_at(now), 2);
    }

    #[test]
    fn test_last_activity_updated_on_admission() {
        let limiter = AccountLimiter::new(1, 5, 100, 1000, 2);
        assert!(limiter.last_activity().is_none());

        assert!(limiter.try_rate_at(Instant::now()));
        assert!(limiter.last_activity().is_some());
    }

    #[test]
    fn test_last_activity_unchanged_on_denial() {
        let limiter = AccountLimiter::new(1, 1, 100, 1000, 2);
        let now = Instant::now();

        assert!(limiter.try_rate_at(now));
        let stamped = limiter.last_activity();

        assert!(!limiter.try_rate_at(now));
        assert_eq!(limiter.last_activity(), stamped);
    }

    #[test]
    fn test_concurrency_delegates_to_gate() {
        let limiter = AccountLimiter::new(1, 5, 100, 1000, 1);

        assert!(limiter.try_concurrency());
        assert!(!limiter.try_concurrency());
        limiter.release_concurrency();
        assert!(limiter.try_concurrency());
    }

    #[test]
    fn test_stats_snapshot() {
        let limiter = AccountLimiter::new(1, 2, 100, 1000, 3);
        let now = Instant::now();

        limiter.try_rate_at(now);
        limiter.try_concurrency();

        let stats = limiter.stats_at(now);
        assert!((stats.current_rate - 1.0 / 60.0).abs() < f64::EPSILON);
        assert_eq!(stats.wait_time, Duration::ZERO);
        assert!(stats.last_activity.is_some());
        assert_eq!(stats.concurrency_available, 2);
    }

    #[test]
    fn test_stats_wait_time_is_max_across_windows() {
        // Day window is the binding constraint
        let limiter = AccountLimiter::new(1, 10, 100, 1, 3);
        let start = Instant::now();

        assert!(limiter.try_rate_at(start));
        let stats = limiter.stats_at(start + Duration::from_secs(3600));
        assert_eq!(stats.wait_time, Duration::from_secs(86_400 - 3600));
    }
}
