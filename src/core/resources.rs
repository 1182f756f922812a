//! Multi-dimensional resource capacity vectors.
//!
//! A [`ResourceDescription`] is used both as a worker's declared capacity and as an
//! implementation's requirement. All operations are dimension-wise; reservation and
//! release are plain subtraction/addition and therefore exactly invertible.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Compute-unit categories that carry their own task-slot limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    /// General purpose CPU cores.
    Cpu,
    /// GPU devices.
    Gpu,
    /// FPGA devices.
    Fpga,
    /// Any other accelerator.
    Other,
}

impl ResourceCategory {
    /// All categories in slot-table order.
    pub const ALL: [Self; 4] = [Self::Cpu, Self::Gpu, Self::Fpga, Self::Other];

    /// Index into per-category tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Cpu => 0,
            Self::Gpu => 1,
            Self::Fpga => 2,
            Self::Other => 3,
        }
    }
}

/// Capacity (or requirement) vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDescription {
    /// CPU computing units.
    pub cpu_units: u32,
    /// GPU computing units.
    pub gpu_units: u32,
    /// FPGA computing units.
    pub fpga_units: u32,
    /// Other accelerator computing units.
    pub other_units: u32,
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Storage in megabytes.
    pub storage_mb: u64,
}

impl ResourceDescription {
    /// Number of dimensions in the vector.
    pub const DIMENSIONS: usize = 6;

    /// The zero vector.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            cpu_units: 0,
            gpu_units: 0,
            fpga_units: 0,
            other_units: 0,
            memory_mb: 0,
            storage_mb: 0,
        }
    }

    /// A description with only CPU units set.
    #[must_use]
    pub const fn cpus(units: u32) -> Self {
        Self {
            cpu_units: units,
            ..Self::empty()
        }
    }

    /// Builder-style memory setter.
    #[must_use]
    pub const fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Builder-style GPU setter.
    #[must_use]
    pub const fn with_gpus(mut self, units: u32) -> Self {
        self.gpu_units = units;
        self
    }

    /// Builder-style FPGA setter.
    #[must_use]
    pub const fn with_fpgas(mut self, units: u32) -> Self {
        self.fpga_units = units;
        self
    }

    /// Builder-style other-accelerator setter.
    #[must_use]
    pub const fn with_others(mut self, units: u32) -> Self {
        self.other_units = units;
        self
    }

    /// Builder-style storage setter.
    #[must_use]
    pub const fn with_storage_mb(mut self, storage_mb: u64) -> Self {
        self.storage_mb = storage_mb;
        self
    }

    fn dims(&self) -> [u64; Self::DIMENSIONS] {
        [
            u64::from(self.cpu_units),
            u64::from(self.gpu_units),
            u64::from(self.fpga_units),
            u64::from(self.other_units),
            self.memory_mb,
            self.storage_mb,
        ]
    }

    /// True iff every dimension of `candidate` is at most the same dimension of `self`.
    #[must_use]
    pub const fn contains(&self, candidate: &Self) -> bool {
        candidate.cpu_units <= self.cpu_units
            && candidate.gpu_units <= self.gpu_units
            && candidate.fpga_units <= self.fpga_units
            && candidate.other_units <= self.other_units
            && candidate.memory_mb <= self.memory_mb
            && candidate.storage_mb <= self.storage_mb
    }

    /// Dimension-wise subtraction, saturating at zero.
    pub fn reduce(&mut self, consumption: &Self) {
        self.cpu_units = self.cpu_units.saturating_sub(consumption.cpu_units);
        self.gpu_units = self.gpu_units.saturating_sub(consumption.gpu_units);
        self.fpga_units = self.fpga_units.saturating_sub(consumption.fpga_units);
        self.other_units = self.other_units.saturating_sub(consumption.other_units);
        self.memory_mb = self.memory_mb.saturating_sub(consumption.memory_mb);
        self.storage_mb = self.storage_mb.saturating_sub(consumption.storage_mb);
    }

    /// Dimension-wise addition.
    pub fn increase(&mut self, consumption: &Self) {
        self.cpu_units = self.cpu_units.saturating_add(consumption.cpu_units);
        self.gpu_units = self.gpu_units.saturating_add(consumption.gpu_units);
        self.fpga_units = self.fpga_units.saturating_add(consumption.fpga_units);
        self.other_units = self.other_units.saturating_add(consumption.other_units);
        self.memory_mb = self.memory_mb.saturating_add(consumption.memory_mb);
        self.storage_mb = self.storage_mb.saturating_add(consumption.storage_mb);
    }

    /// Dimension-wise minimum of two vectors.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            cpu_units: self.cpu_units.min(other.cpu_units),
            gpu_units: self.gpu_units.min(other.gpu_units),
            fpga_units: self.fpga_units.min(other.fpga_units),
            other_units: self.other_units.min(other.other_units),
            memory_mb: self.memory_mb.min(other.memory_mb),
            storage_mb: self.storage_mb.min(other.storage_mb),
        }
    }

    /// True if every dimension is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dims().iter().all(|d| *d == 0)
    }

    /// Maximum number of concurrent instances of `requirement` that this (total)
    /// capacity could ever host. Dimensions the requirement leaves at zero impose no
    /// bound; an empty requirement yields `u32::MAX`.
    #[must_use]
    pub fn can_host_simultaneously(&self, requirement: &Self) -> u32 {
        let total = self.dims();
        let req = requirement.dims();
        let mut min = u64::from(u32::MAX);
        for (t, r) in total.iter().zip(req.iter()) {
            if *r > 0 {
                min = min.min(t / r);
            }
        }
        u32::try_from(min).unwrap_or(u32::MAX)
    }

    /// Scalar cost used to rank actions by how much capacity they occupy.
    #[must_use]
    pub fn cost(&self) -> u64 {
        u64::from(self.cpu_units)
            + u64::from(self.gpu_units)
            + u64::from(self.fpga_units)
            + u64::from(self.other_units)
    }

    /// Whether the description consumes units of `category`.
    #[must_use]
    pub const fn uses(&self, category: ResourceCategory) -> bool {
        match category {
            ResourceCategory::Cpu => self.cpu_units > 0,
            ResourceCategory::Gpu => self.gpu_units > 0,
            ResourceCategory::Fpga => self.fpga_units > 0,
            ResourceCategory::Other => self.other_units > 0,
        }
    }
}

impl fmt::Display for ResourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[cpu={} gpu={} fpga={} other={} mem={}MB disk={}MB]",
            self.cpu_units,
            self.gpu_units,
            self.fpga_units,
            self.other_units,
            self.memory_mb,
            self.storage_mb
        )
    }
}
