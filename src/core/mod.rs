//! Core scheduling abstractions and capacity accounting.

pub mod action;
pub mod audit;
pub mod core_element;
pub mod error;
pub mod gap;
pub mod graph;
pub mod optimizer;
pub mod ordering;
pub mod profile;
pub mod resource_scheduler;
pub mod resources;
pub mod scheduler;
pub mod stats;
pub mod worker;

pub use action::{ActionId, ActionState, AllocatableAction, Assignment, SchedulingInfo};
pub use audit::{build_audit_event, AuditEvent, AuditKind, AuditSink, InMemoryAuditSink};
pub use core_element::{
    CoreElement, CoreId, CoreRegistry, Implementation, ImplementationId, ImplementationKind,
};
pub use error::{AppResult, SchedulerError, SchedulerResult};
pub use gap::{Gap, Placement, Timeline};
pub use graph::ActionGraph;
pub use optimizer::{
    determine_donor_and_receivers, Migration, OptimizationReport, ScheduleOptimizer, WorkerLoad,
};
pub use ordering::{DonationKey, ReadyKey, SelectionKey};
pub use profile::{Profile, ProfileTable};
pub use resource_scheduler::{PlannedAction, ResourceScheduler, ScanResult, SchedulePlan, SimTask};
pub use resources::{ResourceCategory, ResourceDescription};
pub use scheduler::{
    ActionOutcome, CompletionReport, LaunchRequest, MembershipReport, TaskScheduler,
};
pub use stats::{SchedulerCounters, SchedulerStats, WorkerUtilization};
pub use worker::{CapacitySnapshot, SlotLimits, Worker, WorkerKind};
