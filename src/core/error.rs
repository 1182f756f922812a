//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::action::{ActionId, ActionState};

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No core element is registered under this id.
    #[error("unknown core element: {0}")]
    UnknownCoreElement(u32),
    /// The action is not (or no longer) part of the graph.
    #[error("unknown action: {0}")]
    UnknownAction(ActionId),
    /// No worker is registered under this name.
    #[error("unknown worker: {0}")]
    UnknownWorker(String),
    /// A worker with this name is already registered.
    #[error("worker already registered: {0}")]
    DuplicateWorker(String),
    /// No worker can ever host any implementation of the action.
    #[error("action {action} is unschedulable: no worker can host core element {core}")]
    Unschedulable {
        /// Action that could not be placed.
        action: ActionId,
        /// Core element it executes.
        core: u32,
    },
    /// The requested state change is not a forward transition.
    #[error("invalid transition for action {action}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Action being transitioned.
        action: ActionId,
        /// Current state.
        from: ActionState,
        /// Requested state.
        to: ActionState,
    },
    /// Scheduling data was requested for an action not yet bound to a worker.
    #[error("action {0} is not bound to any worker")]
    UnassignedAction(ActionId),
    /// Edge mutation attempted on an action whose lock count is nonzero.
    #[error("action {0} is locked")]
    Locked(ActionId),
    /// An optimization plan computed under an update id that is no longer current.
    #[error("update {got} superseded by {current}")]
    SupersededUpdate {
        /// Update id carried by the stale computation.
        got: u64,
        /// Currently accepted update id.
        current: u64,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
