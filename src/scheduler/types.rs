//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::job::JobDataMap;
use crate::core::types::{JobKey, TriggerKey};
use crate::jobstore::JobStoreError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Job store error.
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Fire a job once, now.
    TriggerJob {
        job_key: JobKey,
        data: JobDataMap,
        response: oneshot::Sender<Result<TriggerKey, SchedulerError>>,
    },
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
