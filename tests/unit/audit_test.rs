//! Tests for audit sink

use prometheus_graph_scheduler::core::{
    build_audit_event, ActionId, AuditKind, AuditSink, InMemoryAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        ActionId(1),
        Some("node-1"),
        AuditKind::Launch,
        Some("payload".to_string()),
        42,
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0], event);
    assert_eq!(events[0].worker.as_deref(), Some("node-1"));
    assert_eq!(events[0].kind, AuditKind::Launch);
    assert_eq!(events[0].created_at_ms, 42);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(ActionId(1), None, AuditKind::Submit, None, 1));
    sink.record(build_audit_event(ActionId(2), None, AuditKind::Submit, None, 2));
    sink.record(build_audit_event(ActionId(3), None, AuditKind::Submit, None, 3));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, ActionId(2)); // First one popped
    assert_eq!(events[1].action, ActionId(3));
}

#[test]
fn test_event_ids_are_unique() {
    let a = build_audit_event(ActionId(1), None, AuditKind::Submit, None, 0);
    let b = build_audit_event(ActionId(1), None, AuditKind::Submit, None, 0);
    assert_ne!(a.event_id, b.event_id);
    assert_eq!(a.event_id.len(), 36);
}

#[test]
fn test_clones_share_buffer() {
    let sink = InMemoryAuditSink::new(8);
    let mut writer = sink.clone();
    writer.record(build_audit_event(ActionId(4), None, AuditKind::Cancel, None, 0));
    writer.record(build_audit_event(ActionId(5), None, AuditKind::Cancel, None, 0));
    assert_eq!(sink.events().len(), 2);
    assert_eq!(sink.events_for(ActionId(5)).len(), 1);
}
