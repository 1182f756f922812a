//! Configuration models for the scheduler, its optimizer, and its workers.

pub mod scheduler;

pub use scheduler::{
    OptimizerConfig, SchedulerConfig, WorkerConfig, CONFIG_PATH_VAR, DEFAULT_EXECUTION_VAR,
    OPTIMIZER_INTERVAL_VAR,
};
