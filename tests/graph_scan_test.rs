//! Scan partitions and timeline properties of a single worker scheduler.

use std::sync::Arc;

use prometheus_graph_scheduler::core::{
    ActionGraph, ActionId, ActionState, Assignment, ResourceDescription, ResourceScheduler,
    Worker,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn bind(graph: &mut ActionGraph, id: ActionId, worker: &str) {
    graph
        .bind(
            id,
            Assignment {
                worker: worker.into(),
                implementation: 0,
                consumption: ResourceDescription::cpus(1),
            },
        )
        .unwrap();
    graph.transition(id, ActionState::Scheduled).unwrap();
}

/// An action running on another worker that is expected to finish at `end`.
fn external(graph: &mut ActionGraph, end: u64) -> ActionId {
    let id = graph.insert_action(0, 0, &[], 0);
    bind(graph, id, "remote");
    graph.transition(id, ActionState::Ready).unwrap();
    graph.transition(id, ActionState::Running).unwrap();
    graph.get_mut(id).unwrap().info_mut().expected_end = end;
    id
}

fn local(
    graph: &mut ActionGraph,
    rs: &mut ResourceScheduler,
    priority: i32,
    preds: &[ActionId],
) -> ActionId {
    let id = graph.insert_action(0, priority, preds, 0);
    bind(graph, id, "local");
    rs.add_pending(id);
    id
}

fn local_scheduler(cpus: u32) -> ResourceScheduler {
    ResourceScheduler::new(
        Arc::new(Worker::method("local", ResourceDescription::cpus(cpus))),
        100,
    )
}

#[test]
fn test_scan_partitions_external_releases_and_chain_heads() {
    let mut graph = ActionGraph::new();
    let mut rs = local_scheduler(4);
    let at_10 = external(&mut graph, 10);
    let at_20 = external(&mut graph, 20);
    let at_90 = external(&mut graph, 90);

    let ready_10 = local(&mut graph, &mut rs, 0, &[at_10]);
    let ready_20 = local(&mut graph, &mut rs, 0, &[at_20]);
    let ready_90a = local(&mut graph, &mut rs, 0, &[at_90]);
    let ready_90b = local(&mut graph, &mut rs, 0, &[at_90]);

    let head_low = local(&mut graph, &mut rs, 1, &[]);
    let head_high = local(&mut graph, &mut rs, 3, &[]);
    let head_mid = local(&mut graph, &mut rs, 2, &[]);
    let tail_a = local(&mut graph, &mut rs, 5, &[head_high]);
    let tail_b = local(&mut graph, &mut rs, 5, &[tail_a]);
    let tail_c = local(&mut graph, &mut rs, 5, &[head_mid, head_low]);

    let scan = rs.scan_actions(&graph);
    let ready: Vec<(u64, ActionId)> = scan.ready.iter().map(|k| (k.release, k.id)).collect();
    assert_eq!(
        ready,
        vec![
            (10, ready_10),
            (20, ready_20),
            (90, ready_90a),
            (90, ready_90b)
        ]
    );
    assert_eq!(scan.selectable_ids(), vec![head_high, head_mid, head_low]);
    assert_eq!(
        scan.blocked.iter().copied().collect::<Vec<_>>(),
        vec![tail_a, tail_b, tail_c]
    );
    assert!(scan.running.is_empty());

    assert_eq!(rs.scan_actions(&graph), scan);
}

#[test]
fn test_scan_is_stable_after_reschedule() {
    let mut graph = ActionGraph::new();
    let mut rs = local_scheduler(2);
    let ext = external(&mut graph, 40);
    let a = local(&mut graph, &mut rs, 0, &[ext]);
    let b = local(&mut graph, &mut rs, 1, &[]);
    local(&mut graph, &mut rs, 0, &[a, b]);
    rs.reschedule_tasks(&mut graph, 1, 0).unwrap();

    let first = rs.scan_actions(&graph);
    let second = rs.scan_actions(&graph);
    assert_eq!(first, second);
}

#[test]
fn test_expected_start_respects_data_predecessors() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..20 {
        let mut graph = ActionGraph::new();
        let mut rs = local_scheduler(rng.random_range(1..=4));
        let mut ids: Vec<ActionId> = Vec::new();
        let mut edges: Vec<(ActionId, Vec<ActionId>)> = Vec::new();
        for _ in 0..25 {
            let mut preds = Vec::new();
            for id in &ids {
                if rng.random_bool(0.15) {
                    preds.push(*id);
                }
            }
            let id = local(&mut graph, &mut rs, rng.random_range(0..3), &preds);
            edges.push((id, preds));
            ids.push(id);
        }
        rs.reschedule_tasks(&mut graph, 1, 0).unwrap();

        for (id, preds) in &edges {
            let start = graph.get(*id).unwrap().info().expected_start;
            for pred in preds {
                let end = graph.get(*pred).unwrap().info().expected_end;
                assert!(start >= end, "{id} starts at {start} before {pred} ends at {end}");
            }
        }
        assert_eq!(graph.find_cycle(&ids), None);
    }
}

#[test]
fn test_serialized_actions_do_not_overlap_beyond_capacity() {
    let mut graph = ActionGraph::new();
    let mut rs = local_scheduler(2);
    let ids: Vec<ActionId> = (0..6).map(|_| local(&mut graph, &mut rs, 0, &[])).collect();
    rs.reschedule_tasks(&mut graph, 1, 0).unwrap();

    let windows: Vec<(u64, u64)> = ids
        .iter()
        .map(|id| {
            let info = graph.get(*id).unwrap().info();
            (info.expected_start, info.expected_end)
        })
        .collect();
    for t in [0, 50, 100, 150, 200, 250] {
        let active = windows.iter().filter(|(s, e)| *s <= t && t < *e).count();
        assert!(active <= 2, "{active} actions overlap at {t}");
    }
    assert_eq!(rs.projected_end(), 300);
}
