//! Tokio execution driver.
//!
//! Dispatches launchable actions, executes them through an [`ActionExecutor`] on the
//! tokio runtime, and reports each completion with its measured duration so the
//! per-worker profiles converge on real execution times.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::{ActionId, ActionOutcome, LaunchRequest, SchedulerResult, TaskScheduler};
use crate::util::clock::now_ms;

/// Runs launched actions.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_graph_scheduler::core::{ActionOutcome, LaunchRequest};
/// use prometheus_graph_scheduler::runtime::ActionExecutor;
///
/// struct Remote;
///
/// #[async_trait]
/// impl ActionExecutor for Remote {
///     async fn execute(&self, launch: LaunchRequest) -> ActionOutcome {
///         // ship `launch` to `launch.worker` and await the result
///         ActionOutcome::Success
///     }
/// }
/// ```
#[async_trait]
pub trait ActionExecutor: Send + Sync + 'static {
    /// Execute one launch and report how it ended.
    async fn execute(&self, launch: LaunchRequest) -> ActionOutcome;
}

/// Totals of a [`TokioDriver::run_until_idle`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveSummary {
    /// Actions launched.
    pub launched: usize,
    /// Successful completions.
    pub succeeded: usize,
    /// Failed completions.
    pub failed: usize,
    /// Live actions left when nothing more could be launched.
    pub remaining: usize,
}

/// Drives a shared [`TaskScheduler`] with a tokio-hosted executor.
pub struct TokioDriver<E: ActionExecutor> {
    scheduler: Arc<TaskScheduler>,
    executor: Arc<E>,
}

impl<E: ActionExecutor> Clone for TokioDriver<E> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<E: ActionExecutor> TokioDriver<E> {
    /// Create a driver.
    #[must_use]
    pub fn new(scheduler: Arc<TaskScheduler>, executor: E) -> Self {
        Self {
            scheduler,
            executor: Arc::new(executor),
        }
    }

    /// Driven scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Dispatch once and spawn every launch onto the current runtime.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors.
    pub fn pump(&self, tasks: &mut JoinSet<(ActionId, ActionOutcome)>) -> SchedulerResult<usize> {
        let launches = self.scheduler.dispatch(now_ms())?;
        let count = launches.len();
        for launch in launches {
            let driver = self.clone();
            tasks.spawn(async move { driver.execute_one(launch).await });
        }
        Ok(count)
    }

    async fn execute_one(&self, launch: LaunchRequest) -> (ActionId, ActionOutcome) {
        let id = launch.action;
        let started = Instant::now();
        let outcome = self.executor.execute(launch).await;
        let measured_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match self
            .scheduler
            .notify_completion(id, outcome, measured_ms, now_ms())
        {
            Ok(report) => debug!(
                action = %id,
                measured_ms,
                promoted = report.promoted.len(),
                cancelled = report.cancelled.len(),
                launched = report.launched.len(),
                "completion reported"
            ),
            Err(e) => warn!(action = %id, error = %e, "completion rejected"),
        }
        (id, outcome)
    }

    /// Launch and await actions until nothing runs and nothing more can launch.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors.
    pub async fn run_until_idle(&self) -> SchedulerResult<DriveSummary> {
        let mut summary = DriveSummary::default();
        let mut tasks = JoinSet::new();
        summary.launched += self.pump(&mut tasks)?;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, ActionOutcome::Success)) => summary.succeeded += 1,
                Ok((_, ActionOutcome::Failure)) => summary.failed += 1,
                Err(e) => warn!(error = %e, "executor task aborted"),
            }
            summary.launched += self.pump(&mut tasks)?;
        }
        summary.remaining = self.scheduler.live_actions();
        Ok(summary)
    }
}

impl<E: ActionExecutor> std::fmt::Debug for TokioDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioDriver")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
