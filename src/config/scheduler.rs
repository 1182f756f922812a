//! Scheduler, optimizer, and worker configuration structures.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;
use crate::core::resources::ResourceDescription;
use crate::core::worker::{SlotLimits, Worker, WorkerKind};

/// Path of a JSON configuration file.
pub const CONFIG_PATH_VAR: &str = "GRAPH_SCHEDULER_CONFIG";
/// Override for [`OptimizerConfig::interval_ms`].
pub const OPTIMIZER_INTERVAL_VAR: &str = "GRAPH_SCHEDULER_OPTIMIZER_INTERVAL_MS";
/// Override for [`SchedulerConfig::default_execution_ms`].
pub const DEFAULT_EXECUTION_VAR: &str = "GRAPH_SCHEDULER_DEFAULT_EXECUTION_MS";

/// Background rebalancing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Whether passes run at all (periodically and on membership changes).
    pub enabled: bool,
    /// Period between passes in milliseconds.
    pub interval_ms: u64,
    /// Safety cap on migrations per pass.
    pub max_iterations: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
            max_iterations: 64,
        }
    }
}

/// Declared worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Unique worker name.
    pub name: String,
    /// Worker variant.
    #[serde(default = "default_kind")]
    pub kind: WorkerKind,
    /// Total capacity.
    #[serde(default)]
    pub description: ResourceDescription,
    /// Slot limits; defaults to the unit counts of `description`.
    #[serde(default)]
    pub slots: Option<SlotLimits>,
    /// Placement tie-break priority (higher wins).
    #[serde(default)]
    pub priority_value: i32,
}

const fn default_kind() -> WorkerKind {
    WorkerKind::Method
}

impl WorkerConfig {
    /// Method worker named `localhost` sized to this machine's logical CPUs.
    #[must_use]
    pub fn local() -> Self {
        let cpus = u32::try_from(num_cpus::get()).unwrap_or(1);
        Self {
            name: "localhost".into(),
            kind: WorkerKind::Method,
            description: ResourceDescription::cpus(cpus),
            slots: None,
            priority_value: 0,
        }
    }

    /// Effective slot limits.
    #[must_use]
    pub fn slot_limits(&self) -> SlotLimits {
        self.slots
            .unwrap_or_else(|| SlotLimits::from_description(&self.description))
    }

    /// Validate worker values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("worker name must not be empty".into());
        }
        match self.kind {
            WorkerKind::Method if self.description.is_empty() => {
                Err("method worker must declare some capacity".into())
            }
            WorkerKind::Service if self.slot_limits().cpu == 0 => {
                Err("service worker needs at least one cpu slot".into())
            }
            _ => Ok(()),
        }
    }

    /// Build the worker.
    #[must_use]
    pub fn to_worker(&self) -> Worker {
        Worker::new(
            self.name.clone(),
            self.kind,
            self.description,
            self.slot_limits(),
        )
        .with_priority_value(self.priority_value)
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Rebalancing settings.
    pub optimizer: OptimizerConfig,
    /// Assumed duration of implementations that have never run on a worker.
    pub default_execution_ms: u64,
    /// Workers registered at startup.
    pub workers: Vec<WorkerConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            default_execution_ms: 100,
            workers: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Validate all values and ensure worker names are unique.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_execution_ms == 0 {
            return Err("default_execution_ms must be greater than 0".into());
        }
        if self.optimizer.enabled && self.optimizer.interval_ms == 0 {
            return Err("optimizer.interval_ms must be greater than 0".into());
        }
        if self.optimizer.max_iterations == 0 {
            return Err("optimizer.max_iterations must be greater than 0".into());
        }
        let mut seen = std::collections::HashSet::new();
        for worker in &self.workers {
            worker
                .validate()
                .map_err(|e| format!("worker `{}` invalid: {e}", worker.name))?;
            if !seen.insert(worker.name.as_str()) {
                return Err(format!("duplicate worker `{}`", worker.name));
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json_str(&text).map_err(anyhow::Error::msg)
    }

    /// Load configuration from the environment, reading `.env` first if present.
    ///
    /// `GRAPH_SCHEDULER_CONFIG` names a JSON file (defaults apply without it);
    /// scalar variables then override individual values.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, unparsable overrides, or invalid values.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SchedulerConfig::from_env`] with an explicit variable lookup.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, unparsable overrides, or invalid values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut cfg = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(value) = lookup(OPTIMIZER_INTERVAL_VAR) {
            cfg.optimizer.interval_ms = value
                .trim()
                .parse()
                .with_context(|| format!("{OPTIMIZER_INTERVAL_VAR}={value}"))?;
        }
        if let Some(value) = lookup(DEFAULT_EXECUTION_VAR) {
            cfg.default_execution_ms = value
                .trim()
                .parse()
                .with_context(|| format!("{DEFAULT_EXECUTION_VAR}={value}"))?;
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}
