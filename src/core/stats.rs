//! Monitoring counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::resources::ResourceDescription;

/// Lock-free counters updated on the scheduling paths.
#[derive(Debug, Default)]
pub struct SchedulerCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) launched: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) migrated: AtomicU64,
    pub(crate) optimizer_passes: AtomicU64,
    pub(crate) discarded_passes: AtomicU64,
}

impl SchedulerCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Consistent-enough copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            launched: self.launched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            migrated: self.migrated.load(Ordering::Relaxed),
            optimizer_passes: self.optimizer_passes.load(Ordering::Relaxed),
            discarded_passes: self.discarded_passes.load(Ordering::Relaxed),
        }
    }
}

/// Scheduler-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Actions accepted by `submit`.
    pub submitted: u64,
    /// Actions launched on a worker.
    pub launched: u64,
    /// Successful completions.
    pub completed: u64,
    /// Failed completions, unschedulable actions, and actions lost with their worker.
    pub failed: u64,
    /// Cancelled actions, including cascades.
    pub cancelled: u64,
    /// Optimizer migrations applied.
    pub migrated: u64,
    /// Optimizer passes applied.
    pub optimizer_passes: u64,
    /// Optimizer passes discarded as superseded.
    pub discarded_passes: u64,
}

/// Read-only per-worker view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerUtilization {
    /// Worker name.
    pub name: String,
    /// Declared total.
    pub total: ResourceDescription,
    /// Currently unreserved.
    pub available: ResourceDescription,
    /// Slots in use per category (cpu, gpu, fpga, other).
    pub used_slots: [u32; 4],
    /// Slot limits per category.
    pub max_slots: [u32; 4],
    /// Pending actions bound here.
    pub queue_depth: usize,
    /// Actions running here.
    pub running: usize,
    /// Projected end of the last planned action (ms).
    pub projected_end: u64,
}
