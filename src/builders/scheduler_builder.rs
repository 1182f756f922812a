//! Builders to construct a scheduler from configuration.

use crate::config::{SchedulerConfig, WorkerConfig};
use crate::core::{AuditSink, ScheduleOptimizer, SchedulerError, TaskScheduler};

/// Build a scheduler with every configured worker registered at time `now_ms`.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidConfig`] if validation fails, or
/// [`SchedulerError::DuplicateWorker`].
pub fn build_scheduler(cfg: &SchedulerConfig, now_ms: u64) -> Result<TaskScheduler, SchedulerError> {
    SchedulerBuilder::new(cfg.clone()).build(now_ms)
}

/// Step-wise scheduler construction.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    audit: Option<Box<dyn AuditSink>>,
}

impl SchedulerBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            audit: None,
        }
    }

    /// Configuration being built.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register an extra worker.
    #[must_use]
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.config.workers.push(worker);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] if validation fails, or
    /// [`SchedulerError::DuplicateWorker`].
    pub fn build(self, now_ms: u64) -> Result<TaskScheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;
        let optimizer = ScheduleOptimizer::new(self.config.optimizer.max_iterations);
        let mut scheduler = TaskScheduler::new(self.config.default_execution_ms, optimizer)
            // Startup registration rebalances once at the end instead of per worker.
            .with_optimizer_enabled(false);
        if let Some(audit) = self.audit {
            scheduler = scheduler.with_audit(audit);
        }
        for worker in &self.config.workers {
            scheduler.add_worker(worker.to_worker(), now_ms)?;
        }
        Ok(scheduler.with_optimizer_enabled(self.config.optimizer.enabled))
    }
}
