//! Scheduler engine driving the job store.
//!
//! This module provides the main scheduling loop that acquires due triggers,
//! fires them at their scheduled time, runs their jobs and reports the
//! outcome back to the store. It also recovers interrupted state on start.

mod engine;
mod executor;
mod handle;
mod handlers;
mod types;

pub use engine::{DEFAULT_IDLE_WAIT, MANUAL_TRIGGER_GROUP, Scheduler};
pub use executor::{CommandExecutor, JobExecutionContext, JobExecutor};
pub use handle::SchedulerHandle;
pub use types::{SchedulerError, SchedulerState};
