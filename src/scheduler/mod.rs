// src/scheduler/mod.rs

pub mod core;
pub mod request;

pub use self::core::{RunScheduler, SchedulerCommand, SchedulerStep};
pub use request::{RequestId, RunOutcome, RunRequest, SessionId, SessionKind};
