//! Tests for builder modules

use prometheus_graph_scheduler::builders::{build_scheduler, SchedulerBuilder};
use prometheus_graph_scheduler::config::{SchedulerConfig, WorkerConfig};
use prometheus_graph_scheduler::core::{InMemoryAuditSink, ResourceDescription, SchedulerError, WorkerKind};

fn worker(name: &str, cpus: u32) -> WorkerConfig {
    WorkerConfig {
        name: name.to_string(),
        kind: WorkerKind::Method,
        description: ResourceDescription::cpus(cpus),
        slots: None,
        priority_value: 0,
    }
}

#[test]
fn test_build_scheduler_registers_workers() {
    let cfg = SchedulerConfig {
        workers: vec![worker("b", 2), worker("a", 4)],
        ..SchedulerConfig::default()
    };
    let scheduler = build_scheduler(&cfg, 0).unwrap();
    assert_eq!(scheduler.worker_names(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        scheduler.worker("a").unwrap().total(),
        &ResourceDescription::cpus(4)
    );
}

#[test]
fn test_builder_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        default_execution_ms: 0,
        ..SchedulerConfig::default()
    };
    let err = SchedulerBuilder::new(cfg).build(0).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[test]
fn test_builder_with_worker_and_audit() {
    let sink = InMemoryAuditSink::new(16);
    let builder = SchedulerBuilder::new(SchedulerConfig::default())
        .with_worker(worker("extra", 1))
        .with_audit(Box::new(sink.clone()));
    assert_eq!(builder.config().workers.len(), 1);
    let scheduler = builder.build(0).unwrap();
    assert_eq!(scheduler.worker_names(), vec!["extra".to_string()]);
    assert_eq!(scheduler.update_id(), 1);
}
