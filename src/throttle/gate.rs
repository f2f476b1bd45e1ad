//! Bounded concurrency permit pool.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A bounded pool of concurrency permits.
///
/// `held` never exceeds `capacity` and never drops below zero: acquisition
/// is a compare-and-swap loop, and release refuses to wrap rather than
/// trusting caller discipline. Lock-free and safe to share across workers.
pub struct CountingGate {
    /// Maximum permits that may be held at once
    capacity: usize,
    /// Permits currently held
    held: AtomicUsize,
}

impl CountingGate {
    /// Create a new gate with `capacity` permits.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "gate capacity must be positive");
        Self {
            capacity,
            held: AtomicUsize::new(0),
        }
    }

    /// Take one permit if any are available. Non-blocking.
    pub fn try_acquire(&self) -> bool {
        self.held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < self.capacity).then_some(held + 1)
            })
            .is_ok()
    }

    /// Return one permit.
    ///
    /// Returns `false` without modifying the count when no permits are held;
    /// the caller surfaces the discipline violation.
    pub fn release(&self) -> bool {
        self.held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| held.checked_sub(1))
            .is_ok()
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.capacity
            .saturating_sub(self.held.load(Ordering::Acquire))
    }

    /// Permits currently held.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::Acquire)
    }

    /// Maximum permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
