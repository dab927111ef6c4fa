//! Kernel record types
//!
//! A [`KernelRecord`] is created once by the producer and lives until the
//! final report is written. The dispatch scheduler, the worker executing
//! it and the monitoring engine all hold the same `Arc`; the fields they
//! race on (measured timestamps and the slot mask) are atomics with
//! acquire/release ordering, so no reader ever observes a torn value.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use crate::utils::time::SENTINEL_NANOS;

/// Kernel kind tag: an index into the closed set of accelerator variants.
///
/// Validated against the configured label count at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelLabel(pub u32);

impl KernelLabel {
    /// Index into per-label tables (duplication counts, feature bytes).
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One admitted kernel.
///
/// Immutable admission data plus the measurement fields filled in by the
/// executing worker. `slot_mask` has one bit per slot; its population
/// count equals `cu` from dispatch on. Occupancy is tracked by the slot
/// table; the record keeps its assignment for the final report.
#[derive(Debug)]
pub struct KernelRecord {
    /// Dense, monotonically increasing id within the workload.
    pub id: u32,

    /// Kernel kind.
    pub label: KernelLabel,

    /// Number of accelerator invocations bundled into this record.
    pub executions: u32,

    /// Compute units: the number of slots occupied while dispatched.
    pub cu: u32,

    /// Inter-arrival delay relative to the previous record, in ms.
    pub intended_arrival_ms: i64,

    /// Absolute monotonic deadline the producer targets for admission (ns).
    pub commanded_arrival: i64,

    measured_arrival: AtomicI64,
    measured_finish: AtomicI64,
    measured_pre_exec: AtomicI64,
    measured_post_exec: AtomicI64,
    slot_mask: AtomicU32,
}

impl KernelRecord {
    /// Create a record with every measurement at the far-future sentinel.
    pub fn new(
        id: u32,
        label: KernelLabel,
        executions: u32,
        cu: u32,
        intended_arrival_ms: i64,
        commanded_arrival: i64,
    ) -> Self {
        Self {
            id,
            label,
            executions,
            cu,
            intended_arrival_ms,
            commanded_arrival,
            measured_arrival: AtomicI64::new(SENTINEL_NANOS),
            measured_finish: AtomicI64::new(SENTINEL_NANOS),
            measured_pre_exec: AtomicI64::new(SENTINEL_NANOS),
            measured_post_exec: AtomicI64::new(SENTINEL_NANOS),
            slot_mask: AtomicU32::new(0),
        }
    }

    pub fn measured_arrival(&self) -> i64 {
        self.measured_arrival.load(Ordering::Acquire)
    }

    pub fn measured_finish(&self) -> i64 {
        self.measured_finish.load(Ordering::Acquire)
    }

    pub fn measured_pre_exec(&self) -> i64 {
        self.measured_pre_exec.load(Ordering::Acquire)
    }

    pub fn measured_post_exec(&self) -> i64 {
        self.measured_post_exec.load(Ordering::Acquire)
    }

    /// Store the arrival timestamp. Must happen after the record has been
    /// registered on its slot live lists and before the accelerator call.
    pub fn mark_arrival(&self, nanos: i64) {
        self.measured_arrival.store(nanos, Ordering::Release);
    }

    pub fn mark_finish(&self, nanos: i64) {
        self.measured_finish.store(nanos, Ordering::Release);
    }

    pub fn mark_pre_exec(&self, nanos: i64) {
        self.measured_pre_exec.store(nanos, Ordering::Release);
    }

    pub fn mark_post_exec(&self, nanos: i64) {
        self.measured_post_exec.store(nanos, Ordering::Release);
    }

    /// Bitmask of the slots this kernel currently occupies (LSB = slot 0).
    pub fn slot_mask(&self) -> u32 {
        self.slot_mask.load(Ordering::Acquire)
    }

    /// Set at dispatch, once the slot table has assigned `cu` free slots.
    pub fn set_slot_mask(&self, mask: u32) {
        self.slot_mask.store(mask, Ordering::Release);
    }

    /// Whether the worker has produced real timestamps yet. Both fields sit
    /// at the sentinel until then, which is exactly the `t0 == tf` branch of
    /// the windowing predicate.
    pub fn has_started(&self) -> bool {
        self.measured_arrival() != SENTINEL_NANOS
    }
}
