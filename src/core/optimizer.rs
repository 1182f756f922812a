//! Global rebalancing of pending work between workers.
//!
//! A pass repeatedly picks the worker with the latest projected completion (the donor)
//! and tries to move one of its pending actions to the earliest-finishing worker that
//! can take it without becoming the new global maximum. The pass stops when no such
//! move exists. The optimizer works on a snapshot; the caller applies the resulting
//! migrations under the scheduler lock, fenced by the pass's update id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::action::{ActionId, Assignment};
use crate::core::core_element::{CoreRegistry, ImplementationId};
use crate::core::error::{SchedulerError, SchedulerResult};
use crate::core::graph::ActionGraph;
use crate::core::resource_scheduler::ResourceScheduler;
use crate::core::resources::ResourceDescription;

/// Projected completion of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLoad {
    /// Worker name.
    pub name: String,
    /// Projected end of its last planned action (ms).
    pub projected_end: u64,
}

impl WorkerLoad {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, projected_end: u64) -> Self {
        Self {
            name: name.into(),
            projected_end,
        }
    }
}

/// Pick the donor (latest projected end, ties by name) and the receivers (every other
/// worker, ascending by projected end, ties by name).
#[must_use]
pub fn determine_donor_and_receivers(loads: &[WorkerLoad]) -> Option<(WorkerLoad, Vec<WorkerLoad>)> {
    let mut sorted: Vec<WorkerLoad> = loads.to_vec();
    sorted.sort_by(|a, b| {
        a.projected_end
            .cmp(&b.projected_end)
            .then_with(|| b.name.cmp(&a.name))
    });
    let donor = sorted.pop()?;
    sorted.sort_by(|a, b| {
        a.projected_end
            .cmp(&b.projected_end)
            .then_with(|| a.name.cmp(&b.name))
    });
    Some((donor, sorted))
}

/// One accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Action moved.
    pub action: ActionId,
    /// Donor worker.
    pub from: String,
    /// Receiver worker.
    pub to: String,
    /// Implementation chosen on the receiver.
    pub implementation: ImplementationId,
    /// Consumption of that implementation on the receiver.
    pub consumption: ResourceDescription,
}

/// Outcome of one optimization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Update id the pass ran under.
    pub update_id: u64,
    /// Moves applied, in order.
    pub migrations: Vec<Migration>,
    /// Iterations of the donor/receiver loop.
    pub iterations: u32,
    /// True when the pass was superseded and nothing was applied.
    pub discarded: bool,
    /// Actions launched once the moves were applied.
    pub launched: Vec<ActionId>,
}

/// Donor/receiver rebalancing heuristic.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleOptimizer {
    max_iterations: u32,
}

impl ScheduleOptimizer {
    /// Optimizer whose loop is capped at `max_iterations` moves per pass.
    #[must_use]
    pub const fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    /// Iteration cap.
    #[must_use]
    pub const fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run a full pass over a snapshot, applying every accepted move to it.
    ///
    /// # Errors
    ///
    /// Propagates graph errors from rescheduling or migration.
    pub fn global_optimization(
        &self,
        registry: &CoreRegistry,
        graph: &mut ActionGraph,
        workers: &mut BTreeMap<String, ResourceScheduler>,
        update_id: u64,
        now: u64,
    ) -> SchedulerResult<OptimizationReport> {
        let mut report = OptimizationReport {
            update_id,
            ..OptimizationReport::default()
        };
        loop {
            if report.iterations >= self.max_iterations {
                warn!(
                    update_id,
                    iterations = report.iterations,
                    "optimizer iteration cap reached"
                );
                break;
            }
            report.iterations += 1;
            for scheduler in workers.values_mut() {
                scheduler.reschedule_tasks(graph, update_id, now)?;
            }
            let loads: Vec<WorkerLoad> = workers
                .values()
                .map(|s| WorkerLoad::new(s.name(), s.projected_end()))
                .collect();
            let Some((donor, receivers)) = determine_donor_and_receivers(&loads) else {
                break;
            };
            let Some(migration) =
                Self::find_migration(registry, graph, workers, &donor, &receivers, &loads, now)
            else {
                debug!(update_id, donor = %donor.name, "no beneficial migration");
                break;
            };
            migrate(graph, workers, &migration, update_id, now)?;
            report.migrations.push(migration);
        }
        info!(
            update_id,
            migrations = report.migrations.len(),
            iterations = report.iterations,
            "optimization pass computed"
        );
        Ok(report)
    }

    fn find_migration(
        registry: &CoreRegistry,
        graph: &ActionGraph,
        workers: &BTreeMap<String, ResourceScheduler>,
        donor: &WorkerLoad,
        receivers: &[WorkerLoad],
        loads: &[WorkerLoad],
        now: u64,
    ) -> Option<Migration> {
        let donor_scheduler = workers.get(&donor.name)?;
        for candidate in donor_scheduler.donation_candidates(graph) {
            let Ok(action) = graph.get(candidate) else {
                continue;
            };
            let remaining = donor_scheduler.pending_tasks(graph, Some(candidate));
            let donor_end = donor_scheduler.simulate(graph, now, &remaining).projected_end;
            if donor_end >= donor.projected_end {
                continue;
            }
            let Ok(implementations) = registry.implementations(action.core_id) else {
                continue;
            };
            for receiver in receivers {
                let Some(receiver_scheduler) = workers.get(&receiver.name) else {
                    continue;
                };
                let others = loads
                    .iter()
                    .filter(|l| l.name != donor.name && l.name != receiver.name)
                    .map(|l| l.projected_end)
                    .max()
                    .unwrap_or(0);
                let mut best: Option<(u64, ImplementationId, ResourceDescription)> = None;
                for implementation in implementations {
                    if !receiver_scheduler.worker().can_run(implementation) {
                        continue;
                    }
                    let consumption = receiver_scheduler.worker().consumption_for(implementation);
                    let mut tasks = receiver_scheduler.pending_tasks(graph, None);
                    tasks.push(receiver_scheduler.sim_task(
                        graph,
                        action,
                        implementation.id,
                        &consumption,
                    ));
                    let end = receiver_scheduler.simulate(graph, now, &tasks).projected_end;
                    if best.is_none_or(|(b, _, _)| end < b) {
                        best = Some((end, implementation.id, consumption));
                    }
                }
                let Some((receiver_end, implementation, consumption)) = best else {
                    continue;
                };
                if receiver_end < donor.projected_end && receiver_end <= donor_end.max(others) {
                    debug!(
                        action = %candidate,
                        from = %donor.name,
                        to = %receiver.name,
                        donor_end,
                        receiver_end,
                        "accepted migration"
                    );
                    return Some(Migration {
                        action: candidate,
                        from: donor.name.clone(),
                        to: receiver.name.clone(),
                        implementation,
                        consumption,
                    });
                }
            }
        }
        None
    }
}

/// Move a pending action between workers: detach it from the donor's scheduling
/// chain, rebind it, and reschedule the receiver. The donor is rescheduled when the
/// detach flagged one of its remaining actions.
///
/// # Errors
///
/// Returns [`SchedulerError::Locked`] if the action is locked,
/// [`SchedulerError::UnknownWorker`] if either worker is gone, or graph errors.
pub fn migrate(
    graph: &mut ActionGraph,
    workers: &mut BTreeMap<String, ResourceScheduler>,
    migration: &Migration,
    update_id: u64,
    now: u64,
) -> SchedulerResult<()> {
    for name in [&migration.from, &migration.to] {
        if !workers.contains_key(name) {
            return Err(SchedulerError::UnknownWorker(name.clone()));
        }
    }
    graph.detach(migration.action)?;
    let donor = workers
        .get_mut(&migration.from)
        .ok_or_else(|| SchedulerError::UnknownWorker(migration.from.clone()))?;
    donor.remove_pending(migration.action);
    graph.bind(
        migration.action,
        Assignment {
            worker: migration.to.clone(),
            implementation: migration.implementation,
            consumption: migration.consumption,
        },
    )?;
    if donor.needs_reschedule(graph) {
        donor.reschedule_tasks(graph, update_id, now)?;
    }
    let receiver = workers
        .get_mut(&migration.to)
        .ok_or_else(|| SchedulerError::UnknownWorker(migration.to.clone()))?;
    receiver.add_pending(migration.action);
    receiver.reschedule_tasks(graph, update_id, now)?;
    Ok(())
}
