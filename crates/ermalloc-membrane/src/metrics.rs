//! Atomic counters for heap observability.
//!
//! All counters use relaxed ordering; they are diagnostic, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-heap operation counters.
pub struct HeapMetrics {
    /// Allocations that received a record.
    pub protected_allocations: AtomicU64,
    /// Protected blocks released.
    pub protected_frees: AtomicU64,
    /// Resizes of protected blocks, including unprotect and adopt.
    pub protected_resizes: AtomicU64,
    /// `change_policies` calls that changed something.
    pub policy_changes: AtomicU64,
    /// Enforcement passes over protected blocks.
    pub enforcements: AtomicU64,
    /// Positions repaired by enforcement or recovery.
    pub corrected_positions: AtomicU64,
    /// Positions no policy could resolve.
    pub unrecoverable_findings: AtomicU64,
    /// Resizes or migrations that carried unrecoverable data forward.
    pub recovery_warnings: AtomicU64,
    /// Writes that re-encoded a block with unresolved positions.
    pub sealed_writes: AtomicU64,
    /// Protected requests served by the raw allocator.
    pub passthrough_fallbacks: AtomicU64,
    /// Raw reservations or resizes that failed.
    pub allocation_failures: AtomicU64,
}

impl HeapMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            protected_allocations: AtomicU64::new(0),
            protected_frees: AtomicU64::new(0),
            protected_resizes: AtomicU64::new(0),
            policy_changes: AtomicU64::new(0),
            enforcements: AtomicU64::new(0),
            corrected_positions: AtomicU64::new(0),
            unrecoverable_findings: AtomicU64::new(0),
            recovery_warnings: AtomicU64::new(0),
            sealed_writes: AtomicU64::new(0),
            passthrough_fallbacks: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            protected_allocations: Self::get(&self.protected_allocations),
            protected_frees: Self::get(&self.protected_frees),
            protected_resizes: Self::get(&self.protected_resizes),
            policy_changes: Self::get(&self.policy_changes),
            enforcements: Self::get(&self.enforcements),
            corrected_positions: Self::get(&self.corrected_positions),
            unrecoverable_findings: Self::get(&self.unrecoverable_findings),
            recovery_warnings: Self::get(&self.recovery_warnings),
            sealed_writes: Self::get(&self.sealed_writes),
            passthrough_fallbacks: Self::get(&self.passthrough_fallbacks),
            allocation_failures: Self::get(&self.allocation_failures),
        }
    }
}

impl Default for HeapMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`HeapMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub protected_allocations: u64,
    pub protected_frees: u64,
    pub protected_resizes: u64,
    pub policy_changes: u64,
    pub enforcements: u64,
    pub corrected_positions: u64,
    pub unrecoverable_findings: u64,
    pub recovery_warnings: u64,
    pub sealed_writes: u64,
    pub passthrough_fallbacks: u64,
    pub allocation_failures: u64,
}
