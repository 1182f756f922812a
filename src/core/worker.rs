//! Workers and their mutex-guarded capacity state.
//!
//! Every worker owns one [`parking_lot::Mutex`] around its available capacity and its
//! per-category slot counters. All reserve/release paths take that lock once and
//! check-then-mutate inside it, so a reservation is atomic with respect to the worker.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::core_element::{Implementation, ImplementationKind};
use crate::core::resources::{ResourceCategory, ResourceDescription};

/// Worker variants, dispatched by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Hosts method implementations against its raw compute capacity.
    Method,
    /// Hosts service implementations; each invocation holds one CPU slot.
    Service,
}

/// Maximum concurrent tasks per resource category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLimits {
    /// CPU task slots.
    pub cpu: u32,
    /// GPU task slots.
    pub gpu: u32,
    /// FPGA task slots.
    pub fpga: u32,
    /// Other-accelerator task slots.
    pub other: u32,
}

impl SlotLimits {
    /// Slot limits equal to the unit counts of a description.
    #[must_use]
    pub const fn from_description(description: &ResourceDescription) -> Self {
        Self {
            cpu: description.cpu_units,
            gpu: description.gpu_units,
            fpga: description.fpga_units,
            other: description.other_units,
        }
    }

    /// Same limit for every category.
    #[must_use]
    pub const fn uniform(limit: u32) -> Self {
        Self {
            cpu: limit,
            gpu: limit,
            fpga: limit,
            other: limit,
        }
    }

    const fn as_array(self) -> [u32; 4] {
        [self.cpu, self.gpu, self.fpga, self.other]
    }
}

/// Point-in-time view of a worker's capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Declared total.
    pub total: ResourceDescription,
    /// Currently unreserved.
    pub available: ResourceDescription,
    /// Slots in use per category (cpu, gpu, fpga, other).
    pub used_slots: [u32; 4],
    /// Slot limits per category (cpu, gpu, fpga, other).
    pub max_slots: [u32; 4],
}

#[derive(Debug)]
struct CapacityState {
    available: ResourceDescription,
    used_slots: [u32; 4],
}

/// A cluster node the scheduler can place work on.
pub struct Worker {
    name: String,
    kind: WorkerKind,
    total: ResourceDescription,
    max_slots: [u32; 4],
    priority_value: i32,
    capacity: Mutex<CapacityState>,
}

impl Worker {
    /// Create a worker with the given total capacity and slot limits.
    pub fn new(
        name: impl Into<String>,
        kind: WorkerKind,
        total: ResourceDescription,
        slots: SlotLimits,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            total,
            max_slots: slots.as_array(),
            priority_value: 0,
            capacity: Mutex::new(CapacityState {
                available: total,
                used_slots: [0; 4],
            }),
        }
    }

    /// Method worker whose slot limits equal its unit counts.
    pub fn method(name: impl Into<String>, total: ResourceDescription) -> Self {
        Self::new(name, WorkerKind::Method, total, SlotLimits::from_description(&total))
    }

    /// Declared priority used to break placement ties (higher wins).
    #[must_use]
    pub fn with_priority_value(mut self, value: i32) -> Self {
        self.priority_value = value;
        self
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker variant.
    #[must_use]
    pub const fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Declared total capacity.
    #[must_use]
    pub const fn total(&self) -> &ResourceDescription {
        &self.total
    }

    /// Declared priority value.
    #[must_use]
    pub const fn priority_value(&self) -> i32 {
        self.priority_value
    }

    /// Slot limit for a category.
    #[must_use]
    pub const fn max_slots(&self, category: ResourceCategory) -> u32 {
        self.max_slots[category.index()]
    }

    /// Static feasibility: could this worker ever run `implementation`?
    #[must_use]
    pub fn can_run(&self, implementation: &Implementation) -> bool {
        match (self.kind, implementation.kind) {
            (WorkerKind::Method, ImplementationKind::Method) => {
                self.total.contains(&implementation.requirements)
            }
            (WorkerKind::Service, ImplementationKind::Service) => self.max_slots[0] > 0,
            _ => false,
        }
    }

    /// How many instances of `implementation` the total capacity could host at once.
    /// Service implementations have no raw-unit bound and return `None`.
    #[must_use]
    pub fn fit_count(&self, implementation: &Implementation) -> Option<u32> {
        match implementation.kind {
            ImplementationKind::Service => None,
            ImplementationKind::Method => {
                Some(self.total.can_host_simultaneously(&implementation.requirements))
            }
        }
    }

    /// Concurrency bound combining raw capacity and the CPU slot limit.
    #[must_use]
    pub fn simultaneous_capacity(&self, implementation: &Implementation) -> u32 {
        self.fit_count(implementation)
            .unwrap_or(u32::MAX)
            .min(self.max_slots(ResourceCategory::Cpu))
    }

    /// Resources an implementation consumes when launched on this worker.
    #[must_use]
    pub fn consumption_for(&self, implementation: &Implementation) -> ResourceDescription {
        match self.kind {
            WorkerKind::Method => implementation.requirements,
            WorkerKind::Service => ResourceDescription::empty(),
        }
    }

    fn slot_categories(&self, consumption: &ResourceDescription) -> Vec<ResourceCategory> {
        match self.kind {
            WorkerKind::Service => vec![ResourceCategory::Cpu],
            WorkerKind::Method => ResourceCategory::ALL
                .into_iter()
                .filter(|c| consumption.uses(*c))
                .collect(),
        }
    }

    fn fits(&self, state: &CapacityState, consumption: &ResourceDescription) -> bool {
        state.available.contains(consumption)
            && self
                .slot_categories(consumption)
                .iter()
                .all(|c| state.used_slots[c.index()] < self.max_slots[c.index()])
    }

    /// Whether the currently available capacity contains `consumption`.
    #[must_use]
    pub fn has_available(&self, consumption: &ResourceDescription) -> bool {
        self.capacity.lock().available.contains(consumption)
    }

    /// Whether any category still has a free slot.
    #[must_use]
    pub fn has_available_slots(&self) -> bool {
        let state = self.capacity.lock();
        state
            .used_slots
            .iter()
            .zip(self.max_slots.iter())
            .any(|(used, max)| used < max)
    }

    /// Available capacity contains `consumption` and every category it uses has a slot.
    #[must_use]
    pub fn can_run_now(&self, consumption: &ResourceDescription) -> bool {
        let state = self.capacity.lock();
        self.fits(&state, consumption)
    }

    /// Reserve capacity and slots for `consumption`.
    ///
    /// Returns the reserved description, or `None` (state untouched) if it does not fit.
    pub fn reserve(&self, consumption: &ResourceDescription) -> Option<ResourceDescription> {
        let mut state = self.capacity.lock();
        if !self.fits(&state, consumption) {
            return None;
        }
        state.available.reduce(consumption);
        for category in self.slot_categories(consumption) {
            state.used_slots[category.index()] += 1;
        }
        debug!(worker = %self.name, consumption = %consumption, "reserved capacity");
        Some(*consumption)
    }

    /// Release capacity and slots previously returned by [`Worker::reserve`].
    pub fn release(&self, consumption: &ResourceDescription) {
        let mut state = self.capacity.lock();
        state.available.increase(consumption);
        state.available = state.available.intersection(&self.total);
        for category in self.slot_categories(consumption) {
            let used = &mut state.used_slots[category.index()];
            *used = used.saturating_sub(1);
        }
        debug!(worker = %self.name, consumption = %consumption, "released capacity");
    }

    /// Drop every reservation, restoring the declared total.
    pub fn release_all_resources(&self) {
        let mut state = self.capacity.lock();
        state.available = self.total;
        state.used_slots = [0; 4];
    }

    /// Currently available capacity.
    #[must_use]
    pub fn available(&self) -> ResourceDescription {
        self.capacity.lock().available
    }

    /// Consistent snapshot of capacity and slot usage.
    #[must_use]
    pub fn snapshot(&self) -> CapacitySnapshot {
        let state = self.capacity.lock();
        CapacitySnapshot {
            total: self.total,
            available: state.available,
            used_slots: state.used_slots,
            max_slots: self.max_slots,
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("total", &self.total)
            .field("priority_value", &self.priority_value)
            .finish_non_exhaustive()
    }
}
