//! # Prometheus Graph Scheduler
//!
//! A resource-aware, full-graph task scheduler with profiling-driven placement and a
//! global rebalancing optimizer.
//!
//! Applications submit *actions* (invocations of registered core elements) together
//! with their data dependencies. The scheduler binds each action to the
//! (implementation, worker) pair with the earliest projected completion, keeps a
//! simulated timeline per worker so every action carries an expected start and end,
//! and launches actions as soon as their predecessors are done and capacity is free.
//!
//! ## Key Features
//!
//! - **Gap-Based Timelines**: Per-worker simulation over free-capacity windows,
//!   backfilling idle windows left by earlier placements
//! - **Profiling**: Measured execution times refine future placement decisions
//! - **Global Rebalancing**: A background pass migrates pending actions from the
//!   worker that finishes last to workers that would finish them sooner
//! - **Locking**: Actions can be pinned so no rebalancing touches them
//! - **Failure Propagation**: Failed or cancelled actions cancel their dependents
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use prometheus_graph_scheduler::core::{
//!     ActionOutcome, Implementation, ResourceDescription, ScheduleOptimizer, TaskScheduler, Worker,
//! };
//!
//! let scheduler = TaskScheduler::new(100, ScheduleOptimizer::new(64));
//! scheduler.add_worker(Worker::method("node-1", ResourceDescription::cpus(4)), 0)?;
//! let core = scheduler.register_core_element(
//!     "render(frame)",
//!     [Implementation::method(0, 0, "render", ResourceDescription::cpus(1))],
//! )?;
//!
//! let first = scheduler.submit(core, 0, &[], 0)?;
//! let second = scheduler.submit(core, 0, &[first], 0)?;
//! for launch in scheduler.dispatch(0)? {
//!     // hand `launch` to the transport, then report back
//!     scheduler.notify_completion(launch.action, ActionOutcome::Success, 40, 40)?;
//! }
//! ```
//!
//! For periodic rebalancing see [`runtime::OptimizerDaemon`]; for an async execution
//! loop see `runtime::TokioDriver` (feature `tokio-runtime`).

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and capacity accounting.
pub mod core;
/// Configuration models for the scheduler, its optimizer, and its workers.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Runtime adapters: optimizer thread, async driver, and wire API.
pub mod runtime;
/// Shared utilities.
pub mod util;
