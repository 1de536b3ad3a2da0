//! Scheduled maintenance of the memory stores.

pub mod scheduler;

pub use scheduler::{
    EngineJob, EngineTask, JobFuture, MaintenanceJob, Scheduler, SkipReason, TaskFailure,
    TaskOutcome, TaskState, TaskStatus,
};
