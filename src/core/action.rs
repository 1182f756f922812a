//! Schedulable actions and their mutable scheduling information.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::core_element::{CoreId, ImplementationId};
use crate::core::error::{SchedulerError, SchedulerResult};
use crate::core::resources::ResourceDescription;

/// Arena index of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Lifecycle state of an action. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Submitted, not yet bound to a worker.
    Created,
    /// Bound to (implementation, worker); waiting on data predecessors.
    Scheduled,
    /// All data predecessors finished.
    Ready,
    /// Capacity reserved and handed to the transport.
    Running,
    /// Completed successfully.
    Finished,
    /// Completed with an error, or could never be placed.
    Error,
    /// Withdrawn before running.
    Cancelled,
}

impl ActionState {
    /// Position in `Created -> Scheduled -> Ready -> Running -> terminal`.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Scheduled => 1,
            Self::Ready => 2,
            Self::Running => 3,
            Self::Finished | Self::Error | Self::Cancelled => 4,
        }
    }

    /// Terminal states are never left.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Cancelled)
    }

    /// Not yet running and not terminal.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Created | Self::Scheduled | Self::Ready)
    }

    /// Whether `self -> to` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Created, Self::Scheduled)
            | (Self::Scheduled, Self::Ready)
            | (Self::Ready, Self::Running)
            | (Self::Running, Self::Finished | Self::Error)
            | (Self::Created | Self::Scheduled | Self::Ready, Self::Cancelled | Self::Error) => {
                true
            }
            // Rebinding after a migration keeps the action scheduled.
            (Self::Scheduled, Self::Scheduled) | (Self::Ready, Self::Ready) => true,
            _ => false,
        }
    }
}

/// The (implementation, worker) pair an action is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Worker name.
    pub worker: String,
    /// Implementation of the action's core element.
    pub implementation: ImplementationId,
    /// Capacity the implementation consumes on that worker.
    pub consumption: ResourceDescription,
}

/// Mutable per-action scheduling record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingInfo {
    /// Projected start time (ms).
    pub expected_start: u64,
    /// Projected end time (ms).
    pub expected_end: u64,
    /// Scheduling predecessors on the same worker.
    pub predecessors: Vec<ActionId>,
    /// Scheduling successors on the same worker.
    pub successors: Vec<ActionId>,
    /// Set while a rebalance pass holds this action in its snapshot; cleared when the
    /// action is rebound, which invalidates any move planned for it.
    pub on_optimization: bool,
    /// Set when a scheduling predecessor was detached; the worker timeline must be
    /// recomputed before this action's times are trusted again.
    pub to_reschedule: bool,
    /// Update id of the last timeline computation that touched this action.
    pub last_update: u64,
    lock_count: u32,
}

impl SchedulingInfo {
    /// Current lock count.
    #[must_use]
    pub const fn lock_count(&self) -> u32 {
        self.lock_count
    }

    /// Whether someone holds a lock on this action's edges.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.lock_count > 0
    }

    /// Increment the lock count.
    pub fn lock(&mut self) {
        self.lock_count += 1;
    }

    /// Decrement the lock count, never below zero.
    pub fn unlock(&mut self) {
        self.lock_count = self.lock_count.saturating_sub(1);
    }

    /// Link a scheduling predecessor (deduplicated).
    pub fn add_predecessor(&mut self, id: ActionId) {
        if !self.predecessors.contains(&id) {
            self.predecessors.push(id);
        }
    }

    /// Link a scheduling successor (deduplicated).
    pub fn add_successor(&mut self, id: ActionId) {
        if !self.successors.contains(&id) {
            self.successors.push(id);
        }
    }

    /// Clear transient rebalance flags.
    pub fn clear_optimization(&mut self) {
        self.on_optimization = false;
        self.to_reschedule = false;
    }
}

/// One schedulable execution of a core element.
#[derive(Debug, Clone)]
pub struct AllocatableAction {
    /// Arena id.
    pub id: ActionId,
    /// Core element executed.
    pub core_id: CoreId,
    /// Action priority; higher values are dispatched first.
    pub priority: i32,
    /// Genuine producer actions.
    pub data_predecessors: Vec<ActionId>,
    /// Genuine consumer actions.
    pub data_successors: Vec<ActionId>,
    /// Time the action was submitted (ms).
    pub submitted_at: u64,
    /// Time the action was launched (ms), once running.
    pub started_at: Option<u64>,
    pub(crate) state: ActionState,
    pub(crate) assignment: Option<Assignment>,
    pub(crate) info: SchedulingInfo,
}

impl AllocatableAction {
    /// Create an action in [`ActionState::Created`].
    #[must_use]
    pub fn new(id: ActionId, core_id: CoreId, priority: i32, submitted_at: u64) -> Self {
        Self {
            id,
            core_id,
            priority,
            data_predecessors: Vec::new(),
            data_successors: Vec::new(),
            submitted_at,
            started_at: None,
            state: ActionState::Created,
            assignment: None,
            info: SchedulingInfo::default(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ActionState {
        self.state
    }

    /// Binding, if any.
    #[must_use]
    pub const fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    /// Binding, or a contract violation if the action was never bound.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnassignedAction`] for unbound actions.
    pub fn bound(&self) -> SchedulerResult<&Assignment> {
        self.assignment
            .as_ref()
            .ok_or(SchedulerError::UnassignedAction(self.id))
    }

    /// Worker the action is bound to.
    #[must_use]
    pub fn worker(&self) -> Option<&str> {
        self.assignment.as_ref().map(|a| a.worker.as_str())
    }

    /// Scheduling information, only meaningful once bound.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnassignedAction`] for unbound actions.
    pub fn scheduling_info(&self) -> SchedulerResult<&SchedulingInfo> {
        self.bound()?;
        Ok(&self.info)
    }

    /// Scheduling information without the binding check, for graph internals.
    #[must_use]
    pub const fn info(&self) -> &SchedulingInfo {
        &self.info
    }

    /// Mutable scheduling information.
    pub fn info_mut(&mut self) -> &mut SchedulingInfo {
        &mut self.info
    }

    /// Consumption of the bound implementation, or zero when unbound.
    #[must_use]
    pub fn consumption(&self) -> ResourceDescription {
        self.assignment
            .as_ref()
            .map_or_else(ResourceDescription::empty, |a| a.consumption)
    }

    /// Move to `to`, rejecting backward transitions.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTransition`] if the move is not forward.
    pub fn transition(&mut self, to: ActionState) -> SchedulerResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                action: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
