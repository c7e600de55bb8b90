//! Saturating demand accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Demand value treated as "unbounded": once a counter reaches it, it never
/// leaves it, and emitters stop parking entirely.
pub const UNBOUNDED: u64 = u64::MAX;

/// An atomic count of items requested but not yet delivered.
///
/// Multiple threads may [`add`](Demand::add) concurrently; additions clamp
/// at [`UNBOUNDED`] rather than wrapping. The pipelines compare this
/// counter against a separate monotone produced count and suspend while the
/// two are equal, so the counter itself is never decremented on the hot
/// path; [`produced`](Demand::produced) exists for consumers that prefer
/// decrement-style accounting.
pub struct Demand(AtomicU64);

impl Demand {
    pub fn new() -> Self {
        Demand(AtomicU64::new(0))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Add `n` to the outstanding demand, saturating at [`UNBOUNDED`].
    ///
    /// Returns the previous value.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_add(n);
            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(previous) => return previous,
                Err(observed) => current = observed,
            }
        }
    }

    /// Subtract `k` delivered items, clamping at zero.
    ///
    /// A no-op on an unbounded counter. Returns the new value.
    pub fn produced(&self, k: u64) -> u64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_sub(k);
            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for Demand {
    fn default() -> Self {
        Self::new()
    }
}
