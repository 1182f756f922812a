//! Total orders shared by scan, dispatch, and optimization.
//!
//! Each key type's `Ord` puts the entry that should be handled first at the front, so
//! a `BTreeSet` of keys iterates in processing order. Every order ends on the action
//! id, which makes all of them total and deterministic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::core::action::{ActionId, AllocatableAction};

/// Ready partition order: release time ascending, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReadyKey {
    /// Time the last off-worker predecessor is expected to finish.
    pub release: u64,
    /// Action id.
    pub id: ActionId,
}

/// Scan/selection order: priority descending, expected start ascending, resource cost
/// ascending, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionKey {
    /// Action priority.
    pub priority: i32,
    /// Expected start (ms).
    pub expected_start: u64,
    /// Scalar resource cost of the bound implementation.
    pub cost: u64,
    /// Action id.
    pub id: ActionId,
}

impl SelectionKey {
    /// Key for an action, using its recorded expected start.
    #[must_use]
    pub fn of(action: &AllocatableAction) -> Self {
        Self {
            priority: action.priority,
            expected_start: action.info().expected_start,
            cost: action.consumption().cost(),
            id: action.id,
        }
    }
}

impl Ord for SelectionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.expected_start.cmp(&other.expected_start))
            .then_with(|| self.cost.cmp(&other.cost))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for SelectionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Donation order: latest expected end first, then priority descending, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DonationKey {
    /// Expected end (ms).
    pub expected_end: u64,
    /// Action priority.
    pub priority: i32,
    /// Action id.
    pub id: ActionId,
}

impl DonationKey {
    /// Key for an action from its current scheduling information.
    #[must_use]
    pub fn of(action: &AllocatableAction) -> Self {
        Self {
            expected_end: action.info().expected_end,
            priority: action.priority,
            id: action.id,
        }
    }
}

impl Ord for DonationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .expected_end
            .cmp(&self.expected_end)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for DonationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
