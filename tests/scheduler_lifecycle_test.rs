//! Integration tests for the submit → dispatch → complete lifecycle.
//!
//! Validates:
//! 1. Capacity is reserved as soon as a ready action fits, and released at completion
//! 2. Successors are promoted only when their last data predecessor finishes
//! 3. Failures and cancellations cascade to pending dependents
//! 4. Worker membership changes re-place, park, or fail actions
//! 5. Locked actions cannot be cancelled or moved

use prometheus_graph_scheduler::core::{
    ActionOutcome, ActionState, AuditKind, CoreId, Implementation, InMemoryAuditSink,
    ResourceDescription, ScheduleOptimizer, SchedulerError, TaskScheduler, Worker,
};

fn scheduler() -> TaskScheduler {
    TaskScheduler::new(100, ScheduleOptimizer::new(64)).with_optimizer_enabled(false)
}

fn cpu_core(scheduler: &TaskScheduler, cpus: u32) -> CoreId {
    scheduler
        .register_core_element(
            format!("work_{cpus}"),
            [Implementation::method(
                0,
                0,
                format!("work_{cpus}"),
                ResourceDescription::cpus(cpus),
            )],
        )
        .unwrap()
}

#[test]
fn test_full_node_action_blocks_capacity_until_completion() {
    let s = scheduler();
    s.add_worker(Worker::method("node", ResourceDescription::cpus(4)), 0)
        .unwrap();
    let big = cpu_core(&s, 4);
    let small = cpu_core(&s, 1);
    let worker = s.worker("node").unwrap();
    let one = ResourceDescription::cpus(1);

    let id = s.submit(big, 0, &[], 0).unwrap();
    assert_eq!(s.action_state(id), Some(ActionState::Running));
    assert!(!worker.has_available(&one));

    let launches = s.dispatch(0).unwrap();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].action, id);
    assert_eq!(launches[0].consumption, ResourceDescription::cpus(4));
    assert!(!worker.has_available(&one));

    // A one-cpu action queues behind it instead of failing.
    let queued = s.submit(small, 0, &[], 0).unwrap();
    assert!(s.dispatch(1).unwrap().is_empty());
    assert_eq!(s.action_state(queued), Some(ActionState::Ready));

    let report = s
        .notify_completion(id, ActionOutcome::Success, 50, 50)
        .unwrap();
    assert_eq!(report.state, ActionState::Finished);
    assert_eq!(report.launched, vec![queued]);
    assert_eq!(s.action_state(queued), Some(ActionState::Running));
    assert_eq!(worker.available(), ResourceDescription::cpus(3));
    assert_eq!(s.action_state(id), None);

    let profile = s.profile("node", big, 0).unwrap();
    assert_eq!(profile.executions, 1);
    assert_eq!(profile.average_ms, 50);

    let launches = s.dispatch(50).unwrap();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].action, queued);
}

#[test]
fn test_successor_promoted_after_predecessor_finishes() {
    let s = scheduler();
    s.add_worker(Worker::method("node", ResourceDescription::cpus(2)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    let a = s.submit(core, 0, &[], 0).unwrap();
    let b = s.submit(core, 0, &[a], 0).unwrap();
    assert_eq!(s.action_state(b), Some(ActionState::Scheduled));

    let info_a = s.scheduling_info(a).unwrap();
    let info_b = s.scheduling_info(b).unwrap();
    assert!(info_b.expected_start >= info_a.expected_end);

    let launches = s.dispatch(0).unwrap();
    assert_eq!(launches.iter().map(|l| l.action).collect::<Vec<_>>(), vec![a]);

    let report = s
        .notify_completion(a, ActionOutcome::Success, 80, 80)
        .unwrap();
    assert_eq!(report.promoted, vec![b]);
    assert_eq!(report.launched, vec![b]);
    assert_eq!(s.action_state(b), Some(ActionState::Running));
    assert_eq!(s.dispatch(80).unwrap()[0].action, b);
}

#[test]
fn test_unschedulable_action_fails_permanently() {
    let s = scheduler();
    s.add_worker(Worker::method("small", ResourceDescription::cpus(2)), 0)
        .unwrap();
    let core = cpu_core(&s, 4);
    let err = s.submit(core, 0, &[], 0).unwrap_err();
    assert!(matches!(err, SchedulerError::Unschedulable { core: c, .. } if c == core));
    assert_eq!(s.live_actions(), 0);
    assert_eq!(s.stats().failed, 1);
}

#[test]
fn test_unknown_core_element_rejected() {
    let s = scheduler();
    let err = s.submit(42, 0, &[], 0).unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownCoreElement(42)));
    assert_eq!(s.live_actions(), 0);
}

#[test]
fn test_cancel_cascades_to_pending_successors() {
    let s = scheduler();
    s.add_worker(Worker::method("node", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    let blocker = s.submit(core, 0, &[], 0).unwrap();
    let a = s.submit(core, 0, &[], 0).unwrap();
    let b = s.submit(core, 0, &[a], 0).unwrap();
    let c = s.submit(core, 0, &[b], 0).unwrap();

    let cancelled = s.cancel(a, 1).unwrap();
    assert_eq!(cancelled, vec![a, b, c]);
    assert_eq!(s.live_actions(), 1);
    assert_eq!(s.action_state(blocker), Some(ActionState::Running));
    assert_eq!(s.stats().cancelled, 3);
    assert_eq!(s.worker_utilization()[0].queue_depth, 0);
}

#[test]
fn test_running_action_cannot_be_cancelled() {
    let s = scheduler();
    s.add_worker(Worker::method("node", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    let a = s.submit(core, 0, &[], 0).unwrap();
    s.dispatch(0).unwrap();
    let err = s.cancel(a, 1).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidTransition {
            from: ActionState::Running,
            ..
        }
    ));
}

#[test]
fn test_failure_cancels_dependents() {
    let s = scheduler();
    s.add_worker(Worker::method("node", ResourceDescription::cpus(2)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    let a = s.submit(core, 0, &[], 0).unwrap();
    let b = s.submit(core, 0, &[a], 0).unwrap();
    let independent = s.submit(core, 0, &[], 0).unwrap();
    s.dispatch(0).unwrap();

    let report = s
        .notify_completion(a, ActionOutcome::Failure, 10, 10)
        .unwrap();
    assert_eq!(report.state, ActionState::Error);
    assert_eq!(report.cancelled, vec![b]);
    assert_eq!(s.action_state(b), None);
    assert!(s.action_state(independent).is_some());
    // Failed runs do not feed the profile.
    assert!(s.profile("node", core, 0).is_none());
}

#[test]
fn test_completion_of_non_running_action_rejected() {
    let s = scheduler();
    s.add_worker(Worker::method("node", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    s.submit(core, 0, &[], 0).unwrap();
    let a = s.submit(core, 0, &[], 0).unwrap();
    assert_eq!(s.action_state(a), Some(ActionState::Ready));
    let err = s
        .notify_completion(a, ActionOutcome::Success, 1, 1)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
}

#[test]
fn test_actions_park_without_workers_and_resume_on_add() {
    let s = scheduler();
    let core = cpu_core(&s, 1);
    let a = s.submit(core, 0, &[], 0).unwrap();
    assert_eq!(s.unassigned(), vec![a]);
    assert_eq!(s.assignment(a).unwrap(), None);
    assert!(matches!(
        s.scheduling_info(a),
        Err(SchedulerError::UnassignedAction(id)) if id == a
    ));

    let report = s
        .add_worker(Worker::method("late", ResourceDescription::cpus(1)), 5)
        .unwrap();
    assert_eq!(report.placed, vec![a]);
    assert_eq!(report.launched, vec![a]);
    assert!(s.unassigned().is_empty());
    assert_eq!(s.assignment(a).unwrap().unwrap().worker, "late");
}

#[test]
fn test_remove_worker_replaces_then_parks_pending_actions() {
    let s = scheduler();
    s.add_worker(Worker::method("w1", ResourceDescription::cpus(1)), 0)
        .unwrap();
    s.add_worker(Worker::method("w2", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    let first = s.submit(core, 0, &[], 0).unwrap();
    let second = s.submit(core, 0, &[], 0).unwrap();
    assert_eq!(s.assignment(first).unwrap().unwrap().worker, "w1");
    assert_eq!(s.assignment(second).unwrap().unwrap().worker, "w2");
    let x = s.submit(core, 0, &[], 0).unwrap();
    assert_eq!(s.assignment(x).unwrap().unwrap().worker, "w1");
    assert_eq!(s.action_state(x), Some(ActionState::Ready));

    let report = s.remove_worker("w1", 1).unwrap();
    assert_eq!(report.failed, vec![first]);
    assert_eq!(report.placed, vec![x]);
    assert!(report.launched.is_empty());
    assert_eq!(s.assignment(x).unwrap().unwrap().worker, "w2");

    let report = s.remove_worker("w2", 2).unwrap();
    assert_eq!(report.failed, vec![second]);
    assert_eq!(report.parked, vec![x]);
    assert_eq!(s.unassigned(), vec![x]);

    let report = s
        .add_worker(Worker::method("w3", ResourceDescription::cpus(1)), 3)
        .unwrap();
    assert_eq!(report.placed, vec![x]);
    assert_eq!(report.launched, vec![x]);
    assert!(matches!(
        s.remove_worker("w1", 4),
        Err(SchedulerError::UnknownWorker(_))
    ));
}

#[test]
fn test_remove_worker_fails_running_actions() {
    let s = scheduler();
    s.add_worker(Worker::method("w1", ResourceDescription::cpus(2)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    let a = s.submit(core, 0, &[], 0).unwrap();
    let b = s.submit(core, 0, &[a], 0).unwrap();
    s.dispatch(0).unwrap();

    let report = s.remove_worker("w1", 10).unwrap();
    assert_eq!(report.failed, vec![a]);
    assert_eq!(report.cancelled, vec![b]);
    assert_eq!(s.live_actions(), 0);
}

#[test]
fn test_duplicate_worker_rejected() {
    let s = scheduler();
    s.add_worker(Worker::method("w", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let err = s
        .add_worker(Worker::method("w", ResourceDescription::cpus(2)), 0)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateWorker(name) if name == "w"));
}

#[test]
fn test_worker_priority_breaks_ties() {
    let s = scheduler();
    s.add_worker(Worker::method("a", ResourceDescription::cpus(1)), 0)
        .unwrap();
    s.add_worker(
        Worker::method("b", ResourceDescription::cpus(1)).with_priority_value(5),
        0,
    )
    .unwrap();
    let core = cpu_core(&s, 1);
    let id = s.submit(core, 0, &[], 0).unwrap();
    assert_eq!(s.assignment(id).unwrap().unwrap().worker, "b");
    assert_eq!(s.select_execution(id, 0).unwrap().worker, "a");
}

#[test]
fn test_assign_execution_moves_action() {
    let s = scheduler();
    s.add_worker(Worker::method("w1", ResourceDescription::cpus(1)), 0)
        .unwrap();
    s.add_worker(Worker::method("w2", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    s.submit(core, 0, &[], 0).unwrap();
    s.submit(core, 0, &[], 0).unwrap();
    let id = s.submit(core, 0, &[], 0).unwrap();
    assert_eq!(s.assignment(id).unwrap().unwrap().worker, "w1");
    s.assign_execution(id, "w2", 0, 0).unwrap();
    assert_eq!(s.assignment(id).unwrap().unwrap().worker, "w2");
    assert_eq!(s.scan_worker("w1").unwrap().selectable_ids(), vec![]);
    assert_eq!(s.scan_worker("w2").unwrap().selectable_ids(), vec![id]);
    assert!(matches!(
        s.assign_execution(id, "nope", 0, 0),
        Err(SchedulerError::UnknownWorker(_))
    ));
}

#[test]
fn test_locked_action_cannot_be_cancelled() {
    let s = scheduler();
    s.add_worker(Worker::method("w", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    s.submit(core, 0, &[], 0).unwrap();
    let id = s.submit(core, 0, &[], 0).unwrap();
    s.lock_action(id).unwrap();
    assert!(matches!(s.cancel(id, 1), Err(SchedulerError::Locked(l)) if l == id));
    assert!(matches!(
        s.assign_execution(id, "w", 0, 1),
        Err(SchedulerError::Locked(_))
    ));
    s.unlock_action(id).unwrap();
    assert_eq!(s.cancel(id, 2).unwrap(), vec![id]);
}

#[test]
fn test_audit_trail_is_monotonic() {
    let sink = InMemoryAuditSink::new(64);
    let s = scheduler().with_audit(Box::new(sink.clone()));
    s.add_worker(Worker::method("w", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    let id = s.submit(core, 0, &[], 0).unwrap();
    s.dispatch(1).unwrap();
    s.notify_completion(id, ActionOutcome::Success, 5, 6)
        .unwrap();

    let kinds: Vec<AuditKind> = sink.events_for(id).into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AuditKind::Submit,
            AuditKind::Schedule,
            AuditKind::Launch,
            AuditKind::Complete
        ]
    );
    let times: Vec<u64> = sink
        .events_for(id)
        .into_iter()
        .map(|e| e.created_at_ms)
        .collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_service_worker_hosts_service_implementations() {
    use prometheus_graph_scheduler::core::{SlotLimits, WorkerKind};

    let s = scheduler();
    s.add_worker(
        Worker::new(
            "svc",
            WorkerKind::Service,
            ResourceDescription::empty(),
            SlotLimits::uniform(1),
        ),
        0,
    )
    .unwrap();
    let core = s
        .register_core_element("query", [Implementation::service(0, 0, "query")])
        .unwrap();
    let a = s.submit(core, 0, &[], 0).unwrap();
    let b = s.submit(core, 0, &[], 0).unwrap();
    let info_b = s.scheduling_info(b).unwrap();
    assert_eq!(info_b.expected_start, 100);

    let launches = s.dispatch(0).unwrap();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].action, a);
    assert!(launches[0].consumption.is_empty());
}

#[test]
fn test_launch_moves_successors_on_other_workers() {
    let s = scheduler();
    s.add_worker(Worker::method("w1", ResourceDescription::cpus(1)), 0)
        .unwrap();
    s.add_worker(
        Worker::method("w2", ResourceDescription::empty().with_gpus(1)),
        0,
    )
    .unwrap();
    let cpu = cpu_core(&s, 1);
    let gpu = s
        .register_core_element(
            "accelerate",
            [Implementation::method(
                0,
                0,
                "accelerate",
                ResourceDescription::empty().with_gpus(1),
            )],
        )
        .unwrap();

    let blocker = s.submit(cpu, 0, &[], 0).unwrap();
    let a = s.submit(cpu, 0, &[], 0).unwrap();
    let b = s.submit(gpu, 0, &[a], 0).unwrap();
    let c = s.submit(cpu, 0, &[b], 0).unwrap();
    assert_eq!(s.assignment(b).unwrap().unwrap().worker, "w2");
    assert_eq!(s.assignment(c).unwrap().unwrap().worker, "w1");

    // The blocker overruns its estimate, so `a` starts late.
    let report = s
        .notify_completion(blocker, ActionOutcome::Success, 100, 500)
        .unwrap();
    assert_eq!(report.launched, vec![a]);
    let info_a = s.scheduling_info(a).unwrap();
    assert_eq!((info_a.expected_start, info_a.expected_end), (500, 600));

    let info_b = s.scheduling_info(b).unwrap();
    assert!(info_b.expected_start >= 600, "b starts at {}", info_b.expected_start);
    let info_c = s.scheduling_info(c).unwrap();
    assert!(info_c.expected_start >= info_b.expected_end);
}

#[test]
fn test_reregistering_a_core_element_keeps_one_copy() {
    let s = scheduler();
    let first = cpu_core(&s, 1);
    let again = cpu_core(&s, 1);
    assert_eq!(first, again);
    assert_eq!(s.implementations(first).unwrap().len(), 1);

    s.register_core_element(
        "work_1",
        [Implementation::method(
            0,
            0,
            "work_1_wide",
            ResourceDescription::cpus(2),
        )],
    )
    .unwrap();
    let implementations = s.implementations(first).unwrap();
    assert_eq!(implementations.len(), 2);
    assert_eq!(implementations[1].id, 1);
}

#[test]
fn test_cancel_refuses_when_a_descendant_is_locked() {
    let s = scheduler();
    s.add_worker(Worker::method("node", ResourceDescription::cpus(1)), 0)
        .unwrap();
    let core = cpu_core(&s, 1);
    let blocker = s.submit(core, 0, &[], 0).unwrap();
    let a = s.submit(core, 0, &[], 0).unwrap();
    let b = s.submit(core, 0, &[a], 0).unwrap();
    s.lock_action(b).unwrap();

    assert!(matches!(s.cancel(a, 1), Err(SchedulerError::Locked(l)) if l == b));
    assert_eq!(s.action_state(a), Some(ActionState::Ready));
    assert_eq!(s.action_state(b), Some(ActionState::Scheduled));
    assert_eq!(s.live_actions(), 3);
    assert_eq!(s.stats().cancelled, 0);

    // A failed input still takes the locked dependent down.
    let report = s
        .notify_completion(blocker, ActionOutcome::Success, 10, 10)
        .unwrap();
    assert_eq!(report.launched, vec![a]);
    let report = s
        .notify_completion(a, ActionOutcome::Failure, 10, 20)
        .unwrap();
    assert_eq!(report.cancelled, vec![b]);
    assert_eq!(s.action_state(b), None);
}
