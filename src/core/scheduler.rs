//! The task scheduler facade.
//!
//! [`TaskScheduler`] serializes every graph mutation behind one `parking_lot::Mutex`
//! around the registry, the action graph, and the per-worker schedulers. Worker
//! capacity has its own lock inside each [`Worker`]. The optimizer computes on a
//! snapshot outside the state lock and applies its moves in a single critical
//! section, fenced by the update id.
//!
//! Capacity is reserved as soon as a scheduled action is ready and fits its worker:
//! every mutating operation ends by launching what it can. The resulting
//! [`LaunchRequest`]s wait in an outbox until [`TaskScheduler::dispatch`] hands them
//! to the transport.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::action::{ActionId, ActionState, Assignment, SchedulingInfo};
use crate::core::audit::{build_audit_event, AuditKind, AuditSink};
use crate::core::core_element::{CoreId, CoreRegistry, Implementation, ImplementationId};
use crate::core::error::{SchedulerError, SchedulerResult};
use crate::core::graph::ActionGraph;
use crate::core::optimizer::{migrate, OptimizationReport, ScheduleOptimizer};
use crate::core::profile::Profile;
use crate::core::resource_scheduler::{ResourceScheduler, ScanResult};
use crate::core::resources::ResourceDescription;
use crate::core::stats::{SchedulerCounters, SchedulerStats, WorkerUtilization};
use crate::core::worker::Worker;

/// How a running action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Failure,
}

/// Work handed to the transport by [`TaskScheduler::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Launched action.
    pub action: ActionId,
    /// Core element it executes.
    pub core_id: CoreId,
    /// Implementation chosen.
    pub implementation: ImplementationId,
    /// Hosting worker.
    pub worker: String,
    /// Capacity reserved for it.
    pub consumption: ResourceDescription,
    /// Projected end (ms).
    pub expected_end: u64,
}

/// Effects of a completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Completed action.
    pub action: ActionId,
    /// Terminal state it reached.
    pub state: ActionState,
    /// Successors whose last data predecessor this was.
    pub promoted: Vec<ActionId>,
    /// Pending successors cancelled because the action failed.
    pub cancelled: Vec<ActionId>,
    /// Actions launched into the freed capacity; their requests wait for dispatch.
    pub launched: Vec<ActionId>,
}

/// Effects of a membership change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipReport {
    /// Worker added or removed.
    pub worker: String,
    /// Actions bound to a worker as a consequence.
    pub placed: Vec<ActionId>,
    /// Actions parked because no worker exists.
    pub parked: Vec<ActionId>,
    /// Actions that failed: lost while running, or now unschedulable.
    pub failed: Vec<ActionId>,
    /// Pending successors cancelled because of those failures.
    pub cancelled: Vec<ActionId>,
    /// Actions launched before the rebalance pass.
    pub launched: Vec<ActionId>,
    /// Rebalance pass run afterwards, if the optimizer is enabled.
    pub rebalance: Option<OptimizationReport>,
}

enum Selection {
    Bound(Assignment),
    NoWorkers,
    Unschedulable,
}

#[derive(Debug, Default)]
struct SchedulerState {
    registry: CoreRegistry,
    graph: ActionGraph,
    workers: BTreeMap<String, ResourceScheduler>,
    unassigned: BTreeSet<ActionId>,
    outbox: Vec<LaunchRequest>,
}

/// Resource-aware full-graph scheduler.
pub struct TaskScheduler {
    state: Mutex<SchedulerState>,
    update_id: AtomicU64,
    optimizer: ScheduleOptimizer,
    optimizer_enabled: bool,
    default_execution_ms: u64,
    counters: SchedulerCounters,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
}

impl TaskScheduler {
    /// Create a scheduler. Unprofiled implementations are assumed to take
    /// `default_execution_ms`.
    #[must_use]
    pub fn new(default_execution_ms: u64, optimizer: ScheduleOptimizer) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            update_id: AtomicU64::new(0),
            optimizer,
            optimizer_enabled: true,
            default_execution_ms,
            counters: SchedulerCounters::default(),
            audit: None,
        }
    }

    /// Enable or disable the rebalance pass on membership changes.
    #[must_use]
    pub fn with_optimizer_enabled(mut self, enabled: bool) -> Self {
        self.optimizer_enabled = enabled;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    fn audit(&self, action: ActionId, worker: Option<&str>, kind: AuditKind, now: u64) {
        if let Some(sink) = &self.audit {
            sink.lock()
                .record(build_audit_event(action, worker, kind, None, now));
        }
    }

    /// Current update id.
    #[must_use]
    pub fn update_id(&self) -> u64 {
        self.update_id.load(Ordering::SeqCst)
    }

    fn bump_update_id(&self) -> u64 {
        self.update_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ---- registry -------------------------------------------------------------

    /// Register a core element with its implementations. Registering a known
    /// signature again returns its id and adds only implementations not yet present.
    ///
    /// # Errors
    ///
    /// Propagates registry errors.
    pub fn register_core_element(
        &self,
        signature: impl Into<String>,
        implementations: impl IntoIterator<Item = Implementation>,
    ) -> SchedulerResult<CoreId> {
        let mut state = self.state.lock();
        let core = state.registry.register_core_element(signature);
        let added = state.registry.register_implementations(core, implementations)?;
        debug!(core, added, "core element registered");
        Ok(core)
    }

    /// Implementations of a core element.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownCoreElement`].
    pub fn implementations(&self, core: CoreId) -> SchedulerResult<Vec<Implementation>> {
        Ok(self.state.lock().registry.implementations(core)?.to_vec())
    }

    // ---- membership -----------------------------------------------------------

    /// Add a worker, retry parked actions, and rebalance.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::DuplicateWorker`] if the name is taken.
    pub fn add_worker(&self, worker: Worker, now: u64) -> SchedulerResult<MembershipReport> {
        let name = worker.name().to_owned();
        let mut report = MembershipReport {
            worker: name.clone(),
            ..MembershipReport::default()
        };
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.workers.contains_key(&name) {
                return Err(SchedulerError::DuplicateWorker(name));
            }
            state.workers.insert(
                name.clone(),
                ResourceScheduler::new(Arc::new(worker), self.default_execution_ms),
            );
            let update_id = self.bump_update_id();
            info!(worker = %name, update_id, "worker added");
            let parked: Vec<ActionId> = std::mem::take(&mut state.unassigned).into_iter().collect();
            for id in parked {
                if state.graph.contains(id) {
                    self.replace(state, id, now, &mut report)?;
                }
            }
            self.reschedule_all(state, now)?;
            report.launched = self.launch_ready(state, now)?;
        }
        if self.optimizer_enabled {
            report.rebalance = Some(self.optimize(now)?);
        }
        Ok(report)
    }

    /// Remove a worker: running actions fail, pending actions move elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownWorker`] if no such worker exists.
    pub fn remove_worker(&self, name: &str, now: u64) -> SchedulerResult<MembershipReport> {
        let mut report = MembershipReport {
            worker: name.to_owned(),
            ..MembershipReport::default()
        };
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let removed = state
                .workers
                .remove(name)
                .ok_or_else(|| SchedulerError::UnknownWorker(name.to_owned()))?;
            let update_id = self.bump_update_id();
            removed.worker().release_all_resources();
            state.outbox.retain(|l| l.worker != name);
            info!(worker = %name, update_id, "worker removed");
            for id in removed.running() {
                if !state.graph.contains(*id) {
                    continue;
                }
                state.graph.transition(*id, ActionState::Error)?;
                report.failed.push(*id);
                SchedulerCounters::bump(&self.counters.failed, 1);
                self.audit(*id, Some(name), AuditKind::Fail, now);
                warn!(action = %id, worker = %name, "running action lost with its worker");
                report.cancelled.extend(self.cascade_cancel(state, *id, now));
                state.graph.remove(*id);
            }
            for id in removed.pending() {
                if !state.graph.contains(*id) {
                    continue;
                }
                state.graph.clear_scheduling_edges(*id);
                state.graph.unbind(*id)?;
                self.replace(state, *id, now, &mut report)?;
            }
            self.reschedule_all(state, now)?;
            report.launched = self.launch_ready(state, now)?;
        }
        if self.optimizer_enabled {
            report.rebalance = Some(self.optimize(now)?);
        }
        Ok(report)
    }

    /// Place an action during a membership change, recording the outcome.
    fn replace(
        &self,
        state: &mut SchedulerState,
        id: ActionId,
        now: u64,
        report: &mut MembershipReport,
    ) -> SchedulerResult<()> {
        match self.place(state, id, now) {
            Ok(true) => report.placed.push(id),
            Ok(false) => report.parked.push(id),
            Err(SchedulerError::Unschedulable { .. }) => {
                report.failed.push(id);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Registered worker names.
    #[must_use]
    pub fn worker_names(&self) -> Vec<String> {
        self.state.lock().workers.keys().cloned().collect()
    }

    /// Shared handle to a worker.
    #[must_use]
    pub fn worker(&self, name: &str) -> Option<Arc<Worker>> {
        self.state
            .lock()
            .workers
            .get(name)
            .map(|s| Arc::clone(s.worker()))
    }

    // ---- submission and placement ---------------------------------------------

    /// Submit an action of `core` that consumes the outputs of `data_predecessors`,
    /// and bind it to the (implementation, worker) pair with the earliest projected end.
    /// A ready action that fits its worker is launched at once: its capacity is
    /// reserved and its request waits for the next [`TaskScheduler::dispatch`]. With no
    /// worker registered the action is parked until one is added.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownCoreElement`], or
    /// [`SchedulerError::Unschedulable`] if no registered worker can ever host it (the
    /// action is then failed and dropped).
    pub fn submit(
        &self,
        core: CoreId,
        priority: i32,
        data_predecessors: &[ActionId],
        now: u64,
    ) -> SchedulerResult<ActionId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.registry.core(core)?;
        let id = state.graph.insert_action(core, priority, data_predecessors, now);
        SchedulerCounters::bump(&self.counters.submitted, 1);
        self.audit(id, None, AuditKind::Submit, now);
        debug!(action = %id, core, priority, "action submitted");
        if self.place(state, id, now)? {
            self.launch_ready(state, now)?;
        }
        Ok(id)
    }

    /// Best (implementation, worker) pair for an action, without binding it.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`], or
    /// [`SchedulerError::Unschedulable`] when no worker can host it.
    pub fn select_execution(&self, id: ActionId, now: u64) -> SchedulerResult<Assignment> {
        let state = self.state.lock();
        let core = state.graph.get(id)?.core_id;
        match Self::select(&state, id, now)? {
            Selection::Bound(assignment) => Ok(assignment),
            Selection::NoWorkers | Selection::Unschedulable => {
                Err(SchedulerError::Unschedulable { action: id, core })
            }
        }
    }

    fn select(state: &SchedulerState, id: ActionId, now: u64) -> SchedulerResult<Selection> {
        if state.workers.is_empty() {
            return Ok(Selection::NoWorkers);
        }
        let action = state.graph.get(id)?;
        let implementations = state.registry.implementations(action.core_id)?;
        let release = state.graph.data_release_time(id).max(now);
        let mut best: Option<(u64, std::cmp::Reverse<i32>, &str, Assignment)> = None;
        for scheduler in state.workers.values() {
            let worker = scheduler.worker();
            for implementation in implementations {
                if !worker.can_run(implementation) {
                    continue;
                }
                let consumption = worker.consumption_for(implementation);
                let duration = scheduler.expected_duration(action.core_id, implementation.id);
                let start = scheduler.earliest_start(&consumption, release, duration);
                let end = start.saturating_add(duration);
                let better = best.as_ref().is_none_or(|(b_end, b_prio, b_name, _)| {
                    (end, std::cmp::Reverse(worker.priority_value()), worker.name())
                        < (*b_end, *b_prio, *b_name)
                });
                if better {
                    best = Some((
                        end,
                        std::cmp::Reverse(worker.priority_value()),
                        worker.name(),
                        Assignment {
                            worker: worker.name().to_owned(),
                            implementation: implementation.id,
                            consumption,
                        },
                    ));
                }
            }
        }
        Ok(best.map_or(Selection::Unschedulable, |(_, _, _, a)| Selection::Bound(a)))
    }

    /// Select and bind. Returns `Ok(false)` when the action was parked.
    fn place(&self, state: &mut SchedulerState, id: ActionId, now: u64) -> SchedulerResult<bool> {
        match Self::select(state, id, now)? {
            Selection::Bound(assignment) => {
                self.bind(state, id, assignment, now)?;
                Ok(true)
            }
            Selection::NoWorkers => {
                state.unassigned.insert(id);
                info!(action = %id, "no workers registered; action parked");
                Ok(false)
            }
            Selection::Unschedulable => {
                let core = state.graph.get(id)?.core_id;
                warn!(action = %id, core, "no worker can host action");
                state.graph.transition(id, ActionState::Error)?;
                SchedulerCounters::bump(&self.counters.failed, 1);
                self.audit(id, None, AuditKind::Fail, now);
                self.cascade_cancel(state, id, now);
                state.graph.remove(id);
                Err(SchedulerError::Unschedulable { action: id, core })
            }
        }
    }

    fn bind(
        &self,
        state: &mut SchedulerState,
        id: ActionId,
        assignment: Assignment,
        now: u64,
    ) -> SchedulerResult<()> {
        let worker = assignment.worker.clone();
        state.graph.bind(id, assignment)?;
        // A rebound action is no longer where any in-flight pass saw it.
        state.graph.get_mut(id)?.info_mut().on_optimization = false;
        let current = state.graph.get(id)?.state();
        if current == ActionState::Created {
            state.graph.transition(id, ActionState::Scheduled)?;
        }
        if state.graph.get(id)?.state() == ActionState::Scheduled
            && state.graph.live_data_predecessors(id).is_empty()
        {
            state.graph.transition(id, ActionState::Ready)?;
        }
        state
            .workers
            .get_mut(&worker)
            .ok_or_else(|| SchedulerError::UnknownWorker(worker.clone()))?
            .add_pending(id);
        self.propagate(state, [worker.clone()], now)?;
        self.audit(id, Some(&worker), AuditKind::Schedule, now);
        debug!(action = %id, worker = %worker, "action scheduled");
        Ok(())
    }

    /// Bind a pending, unlocked action to an explicit worker and implementation.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`], [`SchedulerError::UnknownWorker`],
    /// [`SchedulerError::Locked`], [`SchedulerError::InvalidTransition`] if the action
    /// is no longer pending, or [`SchedulerError::Unschedulable`] if the worker cannot
    /// run that implementation.
    pub fn assign_execution(
        &self,
        id: ActionId,
        worker: &str,
        implementation: ImplementationId,
        now: u64,
    ) -> SchedulerResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let action = state.graph.get(id)?;
        if !action.state().is_pending() {
            return Err(SchedulerError::InvalidTransition {
                action: id,
                from: action.state(),
                to: ActionState::Scheduled,
            });
        }
        if action.info().is_locked() {
            return Err(SchedulerError::Locked(id));
        }
        let core = action.core_id;
        let previous = action.worker().map(str::to_owned);
        let target = state
            .workers
            .get(worker)
            .ok_or_else(|| SchedulerError::UnknownWorker(worker.to_owned()))?;
        let chosen = state
            .registry
            .implementation(core, implementation)
            .filter(|i| target.worker().can_run(i))
            .ok_or(SchedulerError::Unschedulable { action: id, core })?;
        let consumption = target.worker().consumption_for(chosen);
        if let Some(previous) = previous {
            state.graph.detach(id)?;
            if let Some(old) = state.workers.get_mut(&previous) {
                old.remove_pending(id);
            }
            self.propagate(state, [previous], now)?;
        }
        state.unassigned.remove(&id);
        self.bind(
            state,
            id,
            Assignment {
                worker: worker.to_owned(),
                implementation,
                consumption,
            },
            now,
        )?;
        self.launch_ready(state, now)?;
        Ok(())
    }

    // ---- dispatch and completion ----------------------------------------------

    /// Launch whatever fits right now and hand every launch request produced since the
    /// previous call to the caller, in launch order. Actions that do not fit stay
    /// queued.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn dispatch(&self, now: u64) -> SchedulerResult<Vec<LaunchRequest>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.launch_ready(state, now)?;
        Ok(std::mem::take(&mut state.outbox))
    }

    /// Reserve capacity for every ready action whose scheduling predecessors have
    /// started and whose consumption fits its worker, then move the expected times of
    /// everything downstream. Repeats until a round launches nothing.
    fn launch_ready(&self, state: &mut SchedulerState, now: u64) -> SchedulerResult<Vec<ActionId>> {
        let mut launched = Vec::new();
        loop {
            let mut touched: BTreeSet<String> = BTreeSet::new();
            let names: Vec<String> = state.workers.keys().cloned().collect();
            for name in names {
                let Some(scheduler) = state.workers.get_mut(&name) else {
                    continue;
                };
                for id in scheduler.launchable(&state.graph) {
                    let action = state.graph.get(id)?;
                    let core_id = action.core_id;
                    let assignment = action.bound()?.clone();
                    if scheduler.worker().reserve(&assignment.consumption).is_none() {
                        debug!(action = %id, worker = %name, "insufficient capacity; action stays queued");
                        continue;
                    }
                    if let Err(e) = state.graph.transition(id, ActionState::Running) {
                        scheduler.worker().release(&assignment.consumption);
                        return Err(e);
                    }
                    let duration = scheduler.expected_duration(core_id, assignment.implementation);
                    let action = state.graph.get_mut(id)?;
                    action.started_at = Some(now);
                    let info = action.info_mut();
                    info.expected_start = now;
                    info.expected_end = now.saturating_add(duration);
                    let expected_end = info.expected_end;
                    scheduler.mark_running(id);
                    touched.insert(name.clone());
                    for succ in &state.graph.get(id)?.data_successors {
                        if let Some(host) = state.graph.get(*succ).ok().and_then(|s| s.worker()) {
                            touched.insert(host.to_owned());
                        }
                    }
                    SchedulerCounters::bump(&self.counters.launched, 1);
                    self.audit(id, Some(&name), AuditKind::Launch, now);
                    info!(action = %id, worker = %name, expected_end, "action launched");
                    state.outbox.push(LaunchRequest {
                        action: id,
                        core_id,
                        implementation: assignment.implementation,
                        worker: name.clone(),
                        consumption: assignment.consumption,
                        expected_end,
                    });
                    launched.push(id);
                }
            }
            if touched.is_empty() {
                return Ok(launched);
            }
            self.propagate(state, touched, now)?;
        }
    }

    /// Reschedule `seeds`, then every worker hosting a data successor of an action
    /// whose expected end moved, until the timelines settle.
    fn propagate(
        &self,
        state: &mut SchedulerState,
        seeds: impl IntoIterator<Item = String>,
        now: u64,
    ) -> SchedulerResult<()> {
        let update_id = self.update_id();
        let mut queue: VecDeque<String> = VecDeque::new();
        for name in seeds {
            if !queue.contains(&name) {
                queue.push_back(name);
            }
        }
        let mut budget = (state.workers.len() + 1).saturating_mul(state.graph.len() + 1);
        while let Some(name) = queue.pop_front() {
            if budget == 0 {
                warn!(queued = queue.len() + 1, "timeline propagation did not settle");
                break;
            }
            budget -= 1;
            let Some(scheduler) = state.workers.get_mut(&name) else {
                continue;
            };
            let before: Vec<(ActionId, u64)> = scheduler
                .pending()
                .iter()
                .filter_map(|id| state.graph.get(*id).ok().map(|a| (*id, a.info().expected_end)))
                .collect();
            scheduler.reschedule_tasks(&mut state.graph, update_id, now)?;
            for (id, end) in before {
                let Ok(action) = state.graph.get(id) else {
                    continue;
                };
                if action.info().expected_end == end {
                    continue;
                }
                for succ in &action.data_successors {
                    let host = state.graph.get(*succ).ok().and_then(|s| s.worker());
                    if let Some(host) = host {
                        if host != name && !queue.iter().any(|q| q == host) {
                            queue.push_back(host.to_owned());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Report the end of a running action: release its capacity, update the profile,
    /// promote (or, on failure, cancel) its successors, and launch into the freed
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] or
    /// [`SchedulerError::InvalidTransition`] if the action is not running.
    pub fn notify_completion(
        &self,
        id: ActionId,
        outcome: ActionOutcome,
        measured_ms: u64,
        now: u64,
    ) -> SchedulerResult<CompletionReport> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let target = match outcome {
            ActionOutcome::Success => ActionState::Finished,
            ActionOutcome::Failure => ActionState::Error,
        };
        let action = state.graph.get(id)?;
        if action.state() != ActionState::Running {
            return Err(SchedulerError::InvalidTransition {
                action: id,
                from: action.state(),
                to: target,
            });
        }
        let core_id = action.core_id;
        let assignment = action.bound()?.clone();
        let successors = action.data_successors.clone();
        if let Some(scheduler) = state.workers.get_mut(&assignment.worker) {
            scheduler.worker().release(&assignment.consumption);
            scheduler.remove_running(id);
            if outcome == ActionOutcome::Success {
                scheduler.profiled_execution(core_id, assignment.implementation, measured_ms);
            }
        }
        state.graph.transition(id, target)?;
        let mut affected: BTreeSet<String> = BTreeSet::new();
        affected.insert(assignment.worker.clone());
        let mut promoted = Vec::new();
        let mut cancelled = Vec::new();
        match outcome {
            ActionOutcome::Success => {
                SchedulerCounters::bump(&self.counters.completed, 1);
                self.audit(id, Some(&assignment.worker), AuditKind::Complete, now);
                info!(action = %id, worker = %assignment.worker, measured_ms, "action finished");
                state.graph.remove(id);
                for succ in successors {
                    let Ok(node) = state.graph.get(succ) else {
                        continue;
                    };
                    if let Some(worker) = node.worker() {
                        affected.insert(worker.to_owned());
                    }
                    if node.state() == ActionState::Scheduled
                        && node.assignment().is_some()
                        && state.graph.live_data_predecessors(succ).is_empty()
                    {
                        state.graph.transition(succ, ActionState::Ready)?;
                        promoted.push(succ);
                    }
                }
            }
            ActionOutcome::Failure => {
                SchedulerCounters::bump(&self.counters.failed, 1);
                self.audit(id, Some(&assignment.worker), AuditKind::Fail, now);
                warn!(action = %id, worker = %assignment.worker, "action failed");
                cancelled.extend(self.cascade_cancel(state, id, now));
                state.graph.remove(id);
                affected.extend(state.workers.keys().cloned());
            }
        }
        self.propagate(state, affected, now)?;
        let launched = self.launch_ready(state, now)?;
        Ok(CompletionReport {
            action: id,
            state: target,
            promoted,
            cancelled,
            launched,
        })
    }

    /// Cancel a pending action and, transitively, its pending data successors.
    /// Returns every cancelled id, the requested one first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTransition`] if the action already runs,
    /// [`SchedulerError::Locked`] if it or any pending descendant is locked (nothing is
    /// cancelled then), or [`SchedulerError::UnknownAction`].
    pub fn cancel(&self, id: ActionId, now: u64) -> SchedulerResult<Vec<ActionId>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let action = state.graph.get(id)?;
        if !action.state().is_pending() {
            return Err(SchedulerError::InvalidTransition {
                action: id,
                from: action.state(),
                to: ActionState::Cancelled,
            });
        }
        if action.info().is_locked() {
            return Err(SchedulerError::Locked(id));
        }
        let locked = state
            .graph
            .pending_descendants(id)
            .into_iter()
            .find(|d| state.graph.get(*d).is_ok_and(|a| a.info().is_locked()));
        if let Some(locked) = locked {
            return Err(SchedulerError::Locked(locked));
        }
        let worker = action.worker().map(str::to_owned);
        state.graph.detach(id)?;
        if let Some(name) = &worker {
            if let Some(scheduler) = state.workers.get_mut(name) {
                scheduler.remove_pending(id);
            }
        }
        state.unassigned.remove(&id);
        state.graph.transition(id, ActionState::Cancelled)?;
        SchedulerCounters::bump(&self.counters.cancelled, 1);
        self.audit(id, worker.as_deref(), AuditKind::Cancel, now);
        info!(action = %id, "action cancelled");
        let mut cancelled = vec![id];
        cancelled.extend(self.cascade_cancel(state, id, now));
        state.graph.remove(id);
        self.reschedule_all(state, now)?;
        self.launch_ready(state, now)?;
        Ok(cancelled)
    }

    /// Cancel every pending data descendant of `root` and drop them from the graph.
    /// Used when `root` can no longer produce its outputs, so locks on the
    /// descendants do not hold them back.
    fn cascade_cancel(&self, state: &mut SchedulerState, root: ActionId, now: u64) -> Vec<ActionId> {
        let descendants = state.graph.pending_descendants(root);
        for id in &descendants {
            let (worker, locked) = state.graph.get(*id).map_or((None, false), |a| {
                (a.worker().map(str::to_owned), a.info().is_locked())
            });
            if locked {
                warn!(action = %id, root = %root, "cancelling locked action whose input failed");
            }
            if let Some(name) = &worker {
                if let Some(scheduler) = state.workers.get_mut(name) {
                    scheduler.remove_pending(*id);
                }
            }
            state.unassigned.remove(id);
            if state.graph.transition(*id, ActionState::Cancelled).is_ok() {
                SchedulerCounters::bump(&self.counters.cancelled, 1);
                self.audit(*id, worker.as_deref(), AuditKind::Cancel, now);
                debug!(action = %id, root = %root, "cancelled with failed predecessor");
            }
        }
        for id in &descendants {
            state.graph.remove(*id);
        }
        descendants
    }

    fn reschedule_all(&self, state: &mut SchedulerState, now: u64) -> SchedulerResult<()> {
        let names: Vec<String> = state.workers.keys().cloned().collect();
        self.propagate(state, names, now)
    }

    /// Recompute every worker timeline and launch whatever now fits.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn reschedule(&self, now: u64) -> SchedulerResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.reschedule_all(state, now)?;
        self.launch_ready(state, now)?;
        Ok(())
    }

    // ---- optimization ---------------------------------------------------------

    /// Run one rebalance pass: [`TaskScheduler::compute_optimization`] followed by
    /// [`TaskScheduler::apply_optimization`]. A pass superseded in between is reported
    /// with `discarded` set.
    ///
    /// # Errors
    ///
    /// Propagates graph errors from the snapshot computation or the apply phase.
    pub fn optimize(&self, now: u64) -> SchedulerResult<OptimizationReport> {
        let plan = self.compute_optimization(now)?;
        let update_id = plan.update_id;
        let iterations = plan.iterations;
        match self.apply_optimization(plan, now) {
            Err(SchedulerError::SupersededUpdate { .. }) => Ok(OptimizationReport {
                update_id,
                iterations,
                discarded: true,
                ..OptimizationReport::default()
            }),
            other => other,
        }
    }

    /// Start a pass under a fresh update id and compute its moves on a snapshot,
    /// without holding the state lock. Every pending action is flagged as seen by the
    /// pass.
    ///
    /// # Errors
    ///
    /// Propagates graph errors from the snapshot computation.
    pub fn compute_optimization(&self, now: u64) -> SchedulerResult<OptimizationReport> {
        let (update_id, registry, mut graph, mut workers) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let update_id = self.bump_update_id();
            state.graph.begin_optimization();
            (
                update_id,
                state.registry.clone(),
                state.graph.clone(),
                state.workers.clone(),
            )
        };
        let computed = self
            .optimizer
            .global_optimization(&registry, &mut graph, &mut workers, update_id, now);
        if computed.is_err() {
            self.state.lock().graph.end_optimization();
        }
        computed
    }

    /// Apply a plan from [`TaskScheduler::compute_optimization`]. Moves whose action
    /// was rebound, locked, started or dropped since the snapshot are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SupersededUpdate`] if a membership change or a newer
    /// pass bumped the update id since the plan was computed (nothing is applied), or
    /// propagates graph errors.
    pub fn apply_optimization(
        &self,
        plan: OptimizationReport,
        now: u64,
    ) -> SchedulerResult<OptimizationReport> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let update_id = plan.update_id;
        let current = self.update_id();
        if current != update_id {
            SchedulerCounters::bump(&self.counters.discarded_passes, 1);
            warn!(update_id, current, "optimization pass superseded; discarding plan");
            return Err(SchedulerError::SupersededUpdate {
                got: update_id,
                current,
            });
        }

        let mut report = plan;
        let planned = std::mem::take(&mut report.migrations);
        for migration in planned {
            let valid = state.graph.get(migration.action).is_ok_and(|a| {
                a.state().is_pending()
                    && a.info().on_optimization
                    && !a.info().is_locked()
                    && a.worker() == Some(migration.from.as_str())
            }) && state.workers.get(&migration.to).is_some_and(|s| {
                state.graph.get(migration.action).is_ok_and(|a| {
                    state
                        .registry
                        .implementation(a.core_id, migration.implementation)
                        .is_some_and(|i| s.worker().can_run(i))
                })
            });
            if !valid {
                debug!(action = %migration.action, "migration no longer applicable; skipped");
                continue;
            }
            match migrate(&mut state.graph, &mut state.workers, &migration, update_id, now) {
                Ok(()) => {
                    self.audit(migration.action, Some(&migration.to), AuditKind::Migrate, now);
                    info!(
                        action = %migration.action,
                        from = %migration.from,
                        to = %migration.to,
                        "action migrated"
                    );
                    report.migrations.push(migration);
                }
                Err(e) => debug!(action = %migration.action, error = %e, "migration skipped"),
            }
        }
        state.graph.end_optimization();
        self.reschedule_all(state, now)?;
        report.launched = self.launch_ready(state, now)?;
        SchedulerCounters::bump(&self.counters.optimizer_passes, 1);
        SchedulerCounters::bump(
            &self.counters.migrated,
            u64::try_from(report.migrations.len()).unwrap_or(u64::MAX),
        );
        Ok(report)
    }

    // ---- locking --------------------------------------------------------------

    /// Pin an action: while locked it is never migrated, re-linked, or cancelled on
    /// request.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`].
    pub fn lock_action(&self, id: ActionId) -> SchedulerResult<()> {
        self.state.lock().graph.lock(id)
    }

    /// Release a pin taken with [`TaskScheduler::lock_action`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`].
    pub fn unlock_action(&self, id: ActionId) -> SchedulerResult<()> {
        self.state.lock().graph.unlock(id)
    }

    // ---- monitoring -----------------------------------------------------------

    /// Current state of a live action; `None` once it is terminal and dropped.
    #[must_use]
    pub fn action_state(&self, id: ActionId) -> Option<ActionState> {
        self.state.lock().graph.get(id).ok().map(|a| a.state())
    }

    /// Binding of a live action.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`].
    pub fn assignment(&self, id: ActionId) -> SchedulerResult<Option<Assignment>> {
        Ok(self.state.lock().graph.get(id)?.assignment().cloned())
    }

    /// Scheduling information of a bound action.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnassignedAction`] for unbound actions, or
    /// [`SchedulerError::UnknownAction`].
    pub fn scheduling_info(&self, id: ActionId) -> SchedulerResult<SchedulingInfo> {
        Ok(self.state.lock().graph.get(id)?.scheduling_info()?.clone())
    }

    /// Current partitions of one worker.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownWorker`].
    pub fn scan_worker(&self, name: &str) -> SchedulerResult<ScanResult> {
        let state = self.state.lock();
        let scheduler = state
            .workers
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownWorker(name.to_owned()))?;
        Ok(scheduler.scan_actions(&state.graph))
    }

    /// Profile of an implementation on a worker.
    #[must_use]
    pub fn profile(&self, worker: &str, core: CoreId, implementation: ImplementationId) -> Option<Profile> {
        self.state
            .lock()
            .workers
            .get(worker)
            .and_then(|s| s.profiles().get(core, implementation))
    }

    /// Actions waiting for a worker to be added.
    #[must_use]
    pub fn unassigned(&self) -> Vec<ActionId> {
        self.state.lock().unassigned.iter().copied().collect()
    }

    /// Number of live actions.
    #[must_use]
    pub fn live_actions(&self) -> usize {
        self.state.lock().graph.len()
    }

    /// Scheduler-wide counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    /// Per-worker utilization and queue depth.
    #[must_use]
    pub fn worker_utilization(&self) -> Vec<WorkerUtilization> {
        let state = self.state.lock();
        state
            .workers
            .values()
            .map(|s| {
                let snapshot = s.worker().snapshot();
                WorkerUtilization {
                    name: s.name().to_owned(),
                    total: snapshot.total,
                    available: snapshot.available,
                    used_slots: snapshot.used_slots,
                    max_slots: snapshot.max_slots,
                    queue_depth: s.pending().len(),
                    running: s.running().len(),
                    projected_end: s.projected_end(),
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("update_id", &self.update_id())
            .field("optimizer", &self.optimizer)
            .field("optimizer_enabled", &self.optimizer_enabled)
            .field("default_execution_ms", &self.default_execution_ms)
            .finish_non_exhaustive()
    }
}
