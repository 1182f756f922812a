//! Tests for the wire API

use prometheus_graph_scheduler::core::{
    ActionOutcome, ActionState, Implementation, ResourceDescription, ScheduleOptimizer,
    TaskScheduler, Worker,
};
use prometheus_graph_scheduler::runtime::{
    handle_envelope, health, CompletionMessage, Envelope, SubmitRequest, WireMessage,
    WIRE_VERSION,
};

fn scheduler() -> TaskScheduler {
    let s = TaskScheduler::new(10, ScheduleOptimizer::new(4)).with_optimizer_enabled(false);
    s.add_worker(Worker::method("w", ResourceDescription::cpus(1)), 0)
        .unwrap();
    s.register_core_element(
        "f",
        [Implementation::method(0, 0, "f", ResourceDescription::cpus(1))],
    )
    .unwrap();
    s
}

#[test]
fn test_submit_envelope_round_trip_through_scheduler() {
    let s = scheduler();
    let inbound = Envelope::new(
        WireMessage::Submit(SubmitRequest {
            core_id: 0,
            priority: 0,
            data_predecessors: vec![],
        }),
        1,
    );
    let text = inbound.encode().unwrap();
    let decoded = Envelope::decode(&text).unwrap();

    let reply = handle_envelope(&s, &decoded, 1).unwrap();
    assert_eq!(reply.version, WIRE_VERSION);
    let WireMessage::Submitted(status) = reply.message else {
        panic!("unexpected reply: {reply:?}");
    };
    // A free worker takes the action at once; the request waits for dispatch.
    assert_eq!(status.state, Some(ActionState::Running));
    assert_eq!(status.worker.as_deref(), Some("w"));

    let launch = s.dispatch(2).unwrap().remove(0);
    assert_eq!(launch.action, status.action);
    let completion = Envelope::new(
        WireMessage::Completion(CompletionMessage {
            action: launch.action,
            outcome: ActionOutcome::Success,
            measured_ms: 4,
        }),
        6,
    );
    let reply = handle_envelope(&s, &completion, 6).unwrap();
    assert!(matches!(reply.message, WireMessage::Completed(r) if r.state == ActionState::Finished));
}

#[test]
fn test_errors_become_rejections() {
    let s = scheduler();
    let inbound = Envelope::new(
        WireMessage::Submit(SubmitRequest {
            core_id: 99,
            priority: 0,
            data_predecessors: vec![],
        }),
        1,
    );
    let reply = handle_envelope(&s, &inbound, 1).unwrap();
    assert!(matches!(
        reply.message,
        WireMessage::Rejected { ref reason } if reason.contains("unknown core element")
    ));
}

#[test]
fn test_outbound_messages_get_no_reply() {
    let s = scheduler();
    let outbound = Envelope::new(
        WireMessage::Rejected {
            reason: "n/a".into(),
        },
        0,
    );
    assert!(handle_envelope(&s, &outbound, 0).is_none());
}

#[test]
fn test_health_reports_counts() {
    let s = scheduler();
    let h = health(&s);
    assert!(h.ok);
    assert_eq!(h.workers, 1);
    assert_eq!(h.live_actions, 0);
}
