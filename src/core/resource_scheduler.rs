//! Per-worker scheduler: partitions, timeline simulation, and scheduling edges.
//!
//! A [`ResourceScheduler`] owns the set of actions bound to one worker, the worker's
//! execution profiles, and the last computed timeline. Scanning is a pure read of the
//! graph; rescheduling simulates the timeline forward and rewrites the scheduling
//! edges among the worker's pending actions.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::core::action::{ActionId, ActionState, AllocatableAction};
use crate::core::core_element::{CoreId, ImplementationId};
use crate::core::error::SchedulerResult;
use crate::core::gap::{Gap, Timeline};
use crate::core::graph::ActionGraph;
use crate::core::ordering::{DonationKey, ReadyKey, SelectionKey};
use crate::core::profile::ProfileTable;
use crate::core::resources::{ResourceCategory, ResourceDescription};
use crate::core::worker::{Worker, WorkerKind};

/// Partitions produced by a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Actions currently running on the worker.
    pub running: Vec<ActionId>,
    /// Actions waiting only on other workers (or on running actions).
    pub ready: BTreeSet<ReadyKey>,
    /// Actions with no unresolved predecessor.
    pub selectable: BTreeSet<SelectionKey>,
    /// Actions waiting on a pending predecessor bound to the same worker.
    pub blocked: BTreeSet<ActionId>,
}

impl ScanResult {
    /// Ready ids in release order.
    #[must_use]
    pub fn ready_ids(&self) -> Vec<ActionId> {
        self.ready.iter().map(|k| k.id).collect()
    }

    /// Selectable ids in selection order.
    #[must_use]
    pub fn selectable_ids(&self) -> Vec<ActionId> {
        self.selectable.iter().map(|k| k.id).collect()
    }

    fn contains(&self, id: ActionId) -> bool {
        self.blocked.contains(&id)
            || self.ready.iter().any(|k| k.id == id)
            || self.selectable.iter().any(|k| k.id == id)
    }
}

/// Input to a timeline simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTask {
    /// Action id.
    pub id: ActionId,
    /// Action priority.
    pub priority: i32,
    /// Capacity the action occupies on this worker's timeline.
    pub requirement: ResourceDescription,
    /// Scalar cost used by the selection order.
    pub cost: u64,
    /// Expected duration (ms).
    pub duration: u64,
    /// Live data predecessors.
    pub data_predecessors: Vec<ActionId>,
}

/// One action's place in a simulated timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Action id.
    pub id: ActionId,
    /// Projected start (ms).
    pub start: u64,
    /// Projected end (ms).
    pub end: u64,
    /// Scheduling predecessors introduced by the placement.
    pub predecessors: Vec<ActionId>,
}

/// Result of simulating a worker timeline.
#[derive(Debug, Clone, Default)]
pub struct SchedulePlan {
    /// Placements in simulation order.
    pub actions: Vec<PlannedAction>,
    /// Timeline after every placement.
    pub timeline: Timeline,
    /// End of the last planned or running action, never before `now`.
    pub projected_end: u64,
}

impl SchedulePlan {
    /// Placement of one action.
    #[must_use]
    pub fn placement(&self, id: ActionId) -> Option<&PlannedAction> {
        self.actions.iter().find(|p| p.id == id)
    }
}

/// Scheduler of a single worker.
#[derive(Debug, Clone)]
pub struct ResourceScheduler {
    worker: Arc<Worker>,
    profiles: ProfileTable,
    default_execution_ms: u64,
    pending: BTreeSet<ActionId>,
    running: BTreeSet<ActionId>,
    timeline: Timeline,
    projected_end: u64,
    last_update: u64,
}

impl ResourceScheduler {
    /// Scheduler for `worker`; unprofiled implementations are assumed to take
    /// `default_execution_ms`.
    #[must_use]
    pub fn new(worker: Arc<Worker>, default_execution_ms: u64) -> Self {
        let timeline = Timeline::new(0, Self::capacity_of(&worker));
        Self {
            worker,
            profiles: ProfileTable::default(),
            default_execution_ms,
            pending: BTreeSet::new(),
            running: BTreeSet::new(),
            timeline,
            projected_end: 0,
            last_update: 0,
        }
    }

    /// The managed worker.
    #[must_use]
    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.worker.name()
    }

    /// Execution profiles recorded on this worker.
    #[must_use]
    pub const fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    /// Fold a measured execution into the profile.
    pub fn profiled_execution(&mut self, core: CoreId, implementation: ImplementationId, duration_ms: u64) {
        self.profiles.profiled_execution(core, implementation, duration_ms);
    }

    /// Expected duration of an implementation on this worker.
    #[must_use]
    pub fn expected_duration(&self, core: CoreId, implementation: ImplementationId) -> u64 {
        self.profiles
            .expected_duration(core, implementation, self.default_execution_ms)
    }

    /// Pending actions bound here.
    #[must_use]
    pub const fn pending(&self) -> &BTreeSet<ActionId> {
        &self.pending
    }

    /// Running actions hosted here.
    #[must_use]
    pub const fn running(&self) -> &BTreeSet<ActionId> {
        &self.running
    }

    /// Track a newly bound action.
    pub fn add_pending(&mut self, id: ActionId) {
        self.pending.insert(id);
    }

    /// Stop tracking a pending action.
    pub fn remove_pending(&mut self, id: ActionId) -> bool {
        self.pending.remove(&id)
    }

    /// Move an action from pending to running.
    pub fn mark_running(&mut self, id: ActionId) {
        self.pending.remove(&id);
        self.running.insert(id);
    }

    /// Stop tracking a running action.
    pub fn remove_running(&mut self, id: ActionId) -> bool {
        self.running.remove(&id)
    }

    /// Projected end of the last planned action as of the last reschedule.
    #[must_use]
    pub const fn projected_end(&self) -> u64 {
        self.projected_end
    }

    /// Update id of the last reschedule.
    #[must_use]
    pub const fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Gaps recorded by the last reschedule.
    #[must_use]
    pub fn gaps(&self) -> Vec<Gap> {
        self.timeline.gaps()
    }

    fn capacity_of(worker: &Worker) -> ResourceDescription {
        match worker.kind() {
            WorkerKind::Method => *worker.total(),
            WorkerKind::Service => ResourceDescription::cpus(worker.max_slots(ResourceCategory::Cpu)),
        }
    }

    /// Capacity an action with `consumption` occupies on this worker's timeline.
    /// Service invocations are modelled as one CPU slot each.
    #[must_use]
    pub fn timeline_requirement(&self, consumption: &ResourceDescription) -> ResourceDescription {
        match self.worker.kind() {
            WorkerKind::Method => *consumption,
            WorkerKind::Service => ResourceDescription::cpus(1),
        }
    }

    /// Earliest start the current timeline admits for `consumption`.
    #[must_use]
    pub fn earliest_start(&self, consumption: &ResourceDescription, release: u64, duration: u64) -> u64 {
        let requirement = self.timeline_requirement(consumption);
        self.timeline.earliest_start(&requirement, release, duration)
    }

    /// Rebuild the ready/selectable/blocked partitions from the graph.
    #[must_use]
    pub fn scan_actions(&self, graph: &ActionGraph) -> ScanResult {
        let mut scan = ScanResult {
            running: self
                .running
                .iter()
                .copied()
                .filter(|id| graph.contains(*id))
                .collect(),
            ..ScanResult::default()
        };
        for id in &self.pending {
            if let Ok(action) = graph.get(*id) {
                self.classify(graph, action, &self.pending, &mut scan);
            }
        }
        scan
    }

    /// Merge externally supplied pending actions into an existing scan. Actions already
    /// classified keep their partition; members of `pending` count as bound to this
    /// worker when classifying each other.
    pub fn classify_pending_schedulings(
        &self,
        graph: &ActionGraph,
        pending: &[ActionId],
        scan: &mut ScanResult,
    ) {
        let mut local: BTreeSet<ActionId> = self.pending.clone();
        local.extend(pending.iter().copied());
        for id in pending {
            if scan.contains(*id) {
                continue;
            }
            if let Ok(action) = graph.get(*id) {
                self.classify(graph, action, &local, scan);
            }
        }
    }

    fn classify(
        &self,
        graph: &ActionGraph,
        action: &AllocatableAction,
        local: &BTreeSet<ActionId>,
        scan: &mut ScanResult,
    ) {
        let predecessors: Vec<&AllocatableAction> = action
            .data_predecessors
            .iter()
            .chain(action.info().predecessors.iter())
            .filter_map(|p| graph.get(*p).ok())
            .collect();
        if predecessors.is_empty() {
            scan.selectable.insert(SelectionKey::of(action));
            return;
        }
        let blocked = predecessors
            .iter()
            .any(|p| local.contains(&p.id) && p.state().is_pending());
        if blocked {
            scan.blocked.insert(action.id);
        } else {
            let release = predecessors
                .iter()
                .map(|p| p.info().expected_end)
                .max()
                .unwrap_or(0);
            scan.ready.insert(ReadyKey {
                release,
                id: action.id,
            });
        }
    }

    /// Pending actions that may launch now: data-ready and without pending
    /// scheduling predecessors, in selection order.
    #[must_use]
    pub fn launchable(&self, graph: &ActionGraph) -> Vec<ActionId> {
        let mut keys: BTreeSet<SelectionKey> = BTreeSet::new();
        for id in &self.pending {
            let Ok(action) = graph.get(*id) else {
                continue;
            };
            if action.state() != ActionState::Ready {
                continue;
            }
            let waiting = action
                .info()
                .predecessors
                .iter()
                .filter_map(|p| graph.get(*p).ok())
                .any(|p| p.state().is_pending());
            if !waiting {
                keys.insert(SelectionKey::of(action));
            }
        }
        keys.into_iter().map(|k| k.id).collect()
    }

    /// Simulation input for an action bound (or hypothetically bound) here.
    #[must_use]
    pub fn sim_task(
        &self,
        graph: &ActionGraph,
        action: &AllocatableAction,
        implementation: ImplementationId,
        consumption: &ResourceDescription,
    ) -> SimTask {
        SimTask {
            id: action.id,
            priority: action.priority,
            requirement: self.timeline_requirement(consumption),
            cost: consumption.cost(),
            duration: self.expected_duration(action.core_id, implementation),
            data_predecessors: graph.live_data_predecessors(action.id),
        }
    }

    /// Simulation inputs for every pending action, except `excluded`.
    #[must_use]
    pub fn pending_tasks(&self, graph: &ActionGraph, excluded: Option<ActionId>) -> Vec<SimTask> {
        self.pending
            .iter()
            .filter(|id| Some(**id) != excluded)
            .filter_map(|id| graph.get(*id).ok())
            .filter_map(|action| {
                action
                    .assignment()
                    .map(|a| self.sim_task(graph, action, a.implementation, &a.consumption))
            })
            .collect()
    }

    /// Simulate the timeline forward from `now` for `tasks`, on top of the running
    /// actions. Pure: neither the graph nor the scheduler is modified.
    #[must_use]
    pub fn simulate(&self, graph: &ActionGraph, now: u64, tasks: &[SimTask]) -> SchedulePlan {
        let mut free = Self::capacity_of(&self.worker);
        let mut releases = Vec::new();
        let mut projected_end = now;
        for id in &self.running {
            let Ok(action) = graph.get(*id) else {
                continue;
            };
            let requirement = self.timeline_requirement(&action.consumption());
            free.reduce(&requirement);
            let end = action.info().expected_end.max(now);
            projected_end = projected_end.max(end);
            releases.push((end, *id, requirement));
        }
        let mut timeline = Timeline::new(now, free);
        for (end, id, requirement) in releases {
            timeline.add_release(end, id, requirement);
        }

        let by_id: HashMap<ActionId, &SimTask> = tasks.iter().map(|t| (t.id, t)).collect();
        let mut waiting: HashMap<ActionId, usize> = HashMap::new();
        let mut dependents: HashMap<ActionId, Vec<ActionId>> = HashMap::new();
        let mut ready: BTreeSet<ReadyKey> = BTreeSet::new();
        let mut selectable: BTreeSet<SelectionKey> = BTreeSet::new();
        let mut placed: HashMap<ActionId, u64> = HashMap::new();

        let release_of = |task: &SimTask, placed: &HashMap<ActionId, u64>| -> u64 {
            task.data_predecessors
                .iter()
                .map(|p| {
                    placed.get(p).copied().unwrap_or_else(|| {
                        graph.get(*p).map_or(now, |a| a.info().expected_end)
                    })
                })
                .max()
                .unwrap_or(now)
                .max(now)
        };

        for task in tasks {
            let local: Vec<ActionId> = task
                .data_predecessors
                .iter()
                .copied()
                .filter(|p| by_id.contains_key(p))
                .collect();
            if local.is_empty() {
                ready.insert(ReadyKey {
                    release: release_of(task, &placed),
                    id: task.id,
                });
            } else {
                waiting.insert(task.id, local.len());
                for pred in local {
                    dependents.entry(pred).or_default().push(task.id);
                }
            }
        }

        let mut actions = Vec::with_capacity(tasks.len());
        let mut t = now;
        loop {
            while ready.first().is_some_and(|k| k.release <= t) {
                if let Some(key) = ready.pop_first() {
                    if let Some(task) = by_id.get(&key.id) {
                        selectable.insert(SelectionKey {
                            priority: task.priority,
                            expected_start: key.release,
                            cost: task.cost,
                            id: task.id,
                        });
                    }
                }
            }
            let Some(key) = selectable.pop_first() else {
                if let Some(next) = ready.first() {
                    t = next.release;
                    continue;
                }
                break;
            };
            let Some(task) = by_id.get(&key.id) else {
                continue;
            };
            let placement = timeline.place(task.id, &task.requirement, key.expected_start, task.duration);
            trace!(
                worker = %self.name(),
                action = %task.id,
                start = placement.start,
                end = placement.end,
                "planned action"
            );
            placed.insert(task.id, placement.end);
            projected_end = projected_end.max(placement.end);
            actions.push(PlannedAction {
                id: task.id,
                start: placement.start,
                end: placement.end,
                predecessors: placement.predecessors,
            });
            for dependent in dependents.remove(&task.id).unwrap_or_default() {
                let Some(count) = waiting.get_mut(&dependent) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    waiting.remove(&dependent);
                    if let Some(dep) = by_id.get(&dependent) {
                        ready.insert(ReadyKey {
                            release: release_of(dep, &placed),
                            id: dependent,
                        });
                    }
                }
            }
        }

        // Only reachable through inconsistent edges; place after everything else.
        let mut leftovers: Vec<ActionId> = waiting.into_keys().collect();
        leftovers.sort_unstable();
        for id in leftovers {
            if let Some(task) = by_id.get(&id) {
                let release = release_of(task, &placed).max(projected_end);
                let placement = timeline.place(id, &task.requirement, release, task.duration);
                placed.insert(id, placement.end);
                projected_end = projected_end.max(placement.end);
                actions.push(PlannedAction {
                    id,
                    start: placement.start,
                    end: placement.end,
                    predecessors: placement.predecessors,
                });
            }
        }

        SchedulePlan {
            actions,
            timeline,
            projected_end,
        }
    }

    /// Recompute the worker timeline: update expected start/end of every pending
    /// action, rewrite their scheduling edges, record gaps, and return the donation
    /// candidates in donation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph rejects an edge insertion.
    pub fn reschedule_tasks(
        &mut self,
        graph: &mut ActionGraph,
        update_id: u64,
        now: u64,
    ) -> SchedulerResult<Vec<ActionId>> {
        self.pending.retain(|id| graph.contains(*id));
        self.running.retain(|id| graph.contains(*id));
        let tasks = self.pending_tasks(graph, None);
        let plan = self.simulate(graph, now, &tasks);
        self.apply_plan(graph, update_id, plan)?;
        Ok(self.donation_candidates(graph))
    }

    /// Write a plan back into the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph rejects an edge insertion.
    pub fn apply_plan(
        &mut self,
        graph: &mut ActionGraph,
        update_id: u64,
        plan: SchedulePlan,
    ) -> SchedulerResult<()> {
        for planned in &plan.actions {
            if let Ok(action) = graph.get_mut(planned.id) {
                let info = action.info_mut();
                info.expected_start = planned.start;
                info.expected_end = planned.end;
                info.last_update = update_id;
                info.to_reschedule = false;
            }
        }
        let ids: Vec<ActionId> = self.pending.iter().copied().collect();
        let locked = ids
            .iter()
            .filter_map(|id| graph.get(*id).ok())
            .any(|a| a.info().is_locked());
        if locked {
            debug!(worker = %self.name(), "locked actions present; keeping scheduling edges");
        } else {
            for id in &ids {
                graph.clear_scheduling_edges(*id);
            }
            for planned in &plan.actions {
                for pred in &planned.predecessors {
                    if graph.contains(*pred) {
                        graph.add_scheduling_edge(*pred, planned.id)?;
                    }
                }
            }
        }
        if let Some(culprit) = graph.find_cycle(&ids) {
            error!(
                worker = %self.name(),
                action = %culprit,
                "discarding scheduling subgraph after cycle"
            );
            for id in &ids {
                graph.clear_scheduling_edges(*id);
            }
        }
        self.timeline = plan.timeline;
        self.projected_end = plan.projected_end;
        self.last_update = update_id;
        Ok(())
    }

    /// Whether a detach left one of this worker's pending actions flagged for
    /// rescheduling.
    #[must_use]
    pub fn needs_reschedule(&self, graph: &ActionGraph) -> bool {
        self.pending
            .iter()
            .filter_map(|id| graph.get(*id).ok())
            .any(|a| a.info().to_reschedule)
    }

    /// Unlocked pending actions that the optimizer may move, in donation order.
    #[must_use]
    pub fn donation_candidates(&self, graph: &ActionGraph) -> Vec<ActionId> {
        let mut keys: Vec<DonationKey> = self
            .pending
            .iter()
            .filter_map(|id| graph.get(*id).ok())
            .filter(|a| a.state().is_pending() && !a.info().is_locked())
            .map(DonationKey::of)
            .collect();
        keys.sort();
        keys.into_iter().map(|k| k.id).collect()
    }
}
