//! Tests for utility functions

use prometheus_graph_scheduler::util::clock::now_ms;
use prometheus_graph_scheduler::util::telemetry::{init_tracing, init_tracing_with_default};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let first = now_ms();
    let second = now_ms();
    assert!(first > 0);
    assert!(second >= first);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing_with_default("warn");
    init_tracing();
    init_tracing_with_default("debug");
    tracing::info!(component = "util_test", "subscriber installed");
}
