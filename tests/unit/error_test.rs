//! Tests for error types

use prometheus_graph_scheduler::core::{ActionId, ActionState, SchedulerError};

#[test]
fn test_unknown_action_error() {
    let err = SchedulerError::UnknownAction(ActionId(7));
    assert_eq!(format!("{}", err), "unknown action: a7");
}

#[test]
fn test_unschedulable_error() {
    let err = SchedulerError::Unschedulable {
        action: ActionId(3),
        core: 2,
    };
    assert_eq!(
        format!("{}", err),
        "action a3 is unschedulable: no worker can host core element 2"
    );
}

#[test]
fn test_invalid_transition_error() {
    let err = SchedulerError::InvalidTransition {
        action: ActionId(1),
        from: ActionState::Running,
        to: ActionState::Cancelled,
    };
    assert_eq!(
        format!("{}", err),
        "invalid transition for action a1: Running -> Cancelled"
    );
}

#[test]
fn test_superseded_update_error() {
    let err = SchedulerError::SupersededUpdate { got: 3, current: 5 };
    assert_eq!(format!("{}", err), "update 3 superseded by 5");
}

#[test]
fn test_locked_error() {
    let err = SchedulerError::Locked(ActionId(9));
    assert_eq!(format!("{}", err), "action a9 is locked");
}

#[test]
fn test_errors_convert_into_anyhow() {
    let result: prometheus_graph_scheduler::core::AppResult<()> =
        Err(SchedulerError::UnknownWorker("gone".into()).into());
    assert_eq!(result.unwrap_err().to_string(), "unknown worker: gone");
}
