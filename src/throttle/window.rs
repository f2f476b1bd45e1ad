//! Trailing-window event counter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A trailing-time-interval event counter.
///
/// Admits at most `capacity` events per `duration`, measured over a sliding
/// window: every admitted event is recorded as a timestamp, and timestamps
/// older than `duration` are evicted before each capacity check. Memory is
/// bounded by `capacity` entries.
///
/// The window holds no lock of its own; callers guard it with whatever lock
/// covers their scope (one mutex per account, one for the global tier).
pub struct RateWindow {
    /// Maximum events admitted per window
    capacity: usize,
    /// Window length
    duration: Duration,
    /// Timestamps of admitted events, oldest first
    events: VecDeque<Instant>,
}

impl RateWindow {
    /// Create a new window admitting `capacity` events per `duration`.
    pub fn new(capacity: usize, duration: Duration) -> Self {
        debug_assert!(capacity > 0, "window capacity must be positive");
        debug_assert!(!duration.is_zero(), "window duration must be positive");
        Self {
            capacity,
            duration,
            events: VecDeque::with_capacity(capacity),
        }
    }

    /// Admit one event if the window has capacity.
    ///
    /// Evicts expired timestamps, then records `now` and returns `true` if
    /// fewer than `capacity` events remain; otherwise records nothing and
    /// returns `false`.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&mut self, now: Instant) -> bool {
        if !self.has_capacity_at(now) {
            return false;
        }
        self.record_at(now);
        true
    }

    /// Whether the window currently has room for one more event.
    ///
    /// Evicts expired timestamps first. Does not record anything; pair with
    /// [`record_at`](Self::record_at) to commit the event.
    pub(crate) fn has_capacity_at(&mut self, now: Instant) -> bool {
        self.evict(now);
        self.events.len() < self.capacity
    }

    /// Record one admitted event at `now`.
    ///
    /// Only valid immediately after `has_capacity_at` returned `true` under
    /// the same lock.
    pub(crate) fn record_at(&mut self, now: Instant) {
        debug_assert!(self.events.len() < self.capacity);
        self.events.push_back(now);
    }

    /// Time until the oldest retained event exits the window.
    ///
    /// Zero when the window is below capacity.
    pub fn wait_time(&mut self) -> Duration {
        self.wait_time_at(Instant::now())
    }

    pub(crate) fn wait_time_at(&mut self, now: Instant) -> Duration {
        self.evict(now);
        if self.events.len() < self.capacity {
            return Duration::ZERO;
        }
        match self.events.front() {
            Some(oldest) => (*oldest + self.duration).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Current admission rate in events per second, for diagnostics only.
    pub fn current_rate(&mut self) -> f64 {
        self.current_rate_at(Instant::now())
    }

    pub(crate) fn current_rate_at(&mut self, now: Instant) -> f64 {
        self.evict(now);
        self.events.len() as f64 / self.duration.as_secs_f64()
    }

    /// Number of events retained in the window.
    #[cfg(test)]
    pub(crate) fn count_at(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.events.len()
    }

    /// Drop timestamps that have aged out of the window.
    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.events.front() {
            if now.saturating_duration_since(*oldest) >= self.duration {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}
