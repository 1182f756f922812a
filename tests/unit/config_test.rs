//! Tests for configuration validation

use prometheus_graph_scheduler::config::{
    OptimizerConfig, SchedulerConfig, WorkerConfig, CONFIG_PATH_VAR, DEFAULT_EXECUTION_VAR,
    OPTIMIZER_INTERVAL_VAR,
};
use prometheus_graph_scheduler::core::{ResourceDescription, WorkerKind};

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
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.optimizer, OptimizerConfig::default());
    assert_eq!(cfg.default_execution_ms, 100);
}

#[test]
fn test_zero_default_execution_rejected() {
    let cfg = SchedulerConfig {
        default_execution_ms: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_interval_rejected_only_when_enabled() {
    let mut cfg = SchedulerConfig::default();
    cfg.optimizer.interval_ms = 0;
    assert!(cfg.validate().is_err());
    cfg.optimizer.enabled = false;
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_duplicate_worker_rejected() {
    let cfg = SchedulerConfig {
        workers: vec![worker("n1", 4), worker("n1", 2)],
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("duplicate worker `n1`"));
}

#[test]
fn test_method_worker_without_capacity_rejected() {
    let cfg = SchedulerConfig {
        workers: vec![worker("empty", 0)],
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_service_worker_needs_slots() {
    let mut svc = worker("svc", 0);
    svc.kind = WorkerKind::Service;
    assert!(svc.validate().is_err());
    svc.slots = Some(prometheus_graph_scheduler::core::SlotLimits::uniform(2));
    assert!(svc.validate().is_ok());
}

#[test]
fn test_from_json_str() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "optimizer": { "interval_ms": 250 },
            "workers": [
                { "name": "gpu-node", "description": { "cpu_units": 8, "gpu_units": 2 } },
                { "name": "svc", "kind": "service", "slots": { "cpu": 4, "gpu": 0, "fpga": 0, "other": 0 } }
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.optimizer.interval_ms, 250);
    assert!(cfg.optimizer.enabled);
    assert_eq!(cfg.workers.len(), 2);
    assert_eq!(cfg.workers[0].kind, WorkerKind::Method);
    assert_eq!(cfg.workers[0].slot_limits().gpu, 2);
    assert_eq!(cfg.workers[1].kind, WorkerKind::Service);
}

#[test]
fn test_from_json_str_reports_parse_errors() {
    let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_from_lookup_applies_overrides() {
    let cfg = SchedulerConfig::from_lookup(|key| match key {
        k if k == OPTIMIZER_INTERVAL_VAR => Some("50".into()),
        k if k == DEFAULT_EXECUTION_VAR => Some(" 7 ".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.optimizer.interval_ms, 50);
    assert_eq!(cfg.default_execution_ms, 7);
}

#[test]
fn test_from_lookup_rejects_bad_numbers() {
    let result = SchedulerConfig::from_lookup(|key| {
        (key == DEFAULT_EXECUTION_VAR).then(|| "soon".to_string())
    });
    assert!(result.is_err());
}

#[test]
fn test_from_lookup_reads_config_file() {
    let path = std::env::temp_dir().join(format!(
        "graph-scheduler-config-{}.json",
        std::process::id()
    ));
    std::fs::write(&path, r#"{ "default_execution_ms": 33, "workers": [ { "name": "a", "description": { "cpu_units": 2 } } ] }"#)
        .unwrap();
    let file = path.to_string_lossy().to_string();
    let cfg = SchedulerConfig::from_lookup(|key| (key == CONFIG_PATH_VAR).then(|| file.clone()))
        .unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(cfg.default_execution_ms, 33);
    assert_eq!(cfg.workers[0].name, "a");
}

#[test]
fn test_local_worker_uses_machine_cpus() {
    let local = WorkerConfig::local();
    assert_eq!(local.name, "localhost");
    assert!(local.description.cpu_units >= 1);
    assert!(local.validate().is_ok());
}
