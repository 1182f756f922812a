//! Execution-time profiles per implementation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::core_element::{CoreId, ImplementationId};

/// Running statistics of measured execution times (ms).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Number of samples.
    pub executions: u64,
    /// Running average.
    pub average_ms: u64,
    /// Shortest sample.
    pub min_ms: u64,
    /// Longest sample.
    pub max_ms: u64,
}

impl Profile {
    /// Fold one measurement into the profile.
    pub fn accumulate(&mut self, duration_ms: u64) {
        if self.executions == 0 {
            self.min_ms = duration_ms;
            self.max_ms = duration_ms;
            self.average_ms = duration_ms;
        } else {
            self.min_ms = self.min_ms.min(duration_ms);
            self.max_ms = self.max_ms.max(duration_ms);
            let total = u128::from(self.average_ms) * u128::from(self.executions)
                + u128::from(duration_ms);
            let avg = total / (u128::from(self.executions) + 1);
            self.average_ms = u64::try_from(avg).unwrap_or(u64::MAX);
        }
        self.executions += 1;
    }
}

/// Profiles of every implementation run on one worker.
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    profiles: HashMap<(CoreId, ImplementationId), Profile>,
}

impl ProfileTable {
    /// Record a measured execution.
    pub fn profiled_execution(
        &mut self,
        core_id: CoreId,
        implementation: ImplementationId,
        duration_ms: u64,
    ) {
        self.profiles
            .entry((core_id, implementation))
            .or_default()
            .accumulate(duration_ms);
    }

    /// Profile for an implementation, if it ever ran here.
    #[must_use]
    pub fn get(&self, core_id: CoreId, implementation: ImplementationId) -> Option<Profile> {
        self.profiles.get(&(core_id, implementation)).copied()
    }

    /// Expected duration, falling back to `default_ms` for unprofiled implementations.
    #[must_use]
    pub fn expected_duration(
        &self,
        core_id: CoreId,
        implementation: ImplementationId,
        default_ms: u64,
    ) -> u64 {
        self.get(core_id, implementation)
            .map_or(default_ms, |p| p.average_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average() {
        let mut table = ProfileTable::default();
        assert_eq!(table.expected_duration(0, 0, 500), 500);
        table.profiled_execution(0, 0, 100);
        table.profiled_execution(0, 0, 300);
        let profile = table.get(0, 0).unwrap();
        assert_eq!(profile.executions, 2);
        assert_eq!(profile.average_ms, 200);
        assert_eq!(profile.min_ms, 100);
        assert_eq!(profile.max_ms, 300);
        assert_eq!(table.expected_duration(0, 1, 42), 42);
    }
}
