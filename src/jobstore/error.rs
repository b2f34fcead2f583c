//! Job store errors.

use thiserror::Error;

use crate::core::schedule::ScheduleError;
use crate::storage::StorageError;

/// Errors returned by [`JobStore`](super::JobStore) operations.
///
/// Missing records are never errors: lookups return `None` and removals
/// return `false`.
#[derive(Debug, Error)]
pub enum JobStoreError {
    /// A job, trigger or calendar with this key exists and replace was not requested.
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    /// A trigger refers to a job or calendar that does not exist.
    #[error("referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    /// Invalid store configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The group matcher operator is not supported by this operation.
    #[error("unsupported group matcher: {0}")]
    UnsupportedMatcher(String),

    /// The trigger's schedule or bounds are invalid.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(#[from] ScheduleError),

    /// The trigger's schedule yields no fire time at all.
    #[error("trigger {0} will never fire")]
    WillNeverFire(String),

    /// The calendar definition is invalid.
    #[error("invalid calendar: {0}")]
    InvalidCalendar(ScheduleError),

    /// The calendar is still referenced by at least one trigger.
    #[error("calendar {name} is referenced by trigger {trigger}")]
    CalendarInUse { name: String, trigger: String },

    /// The underlying store failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

impl JobStoreError {
    pub(crate) fn already_exists(kind: &'static str, key: impl ToString) -> Self {
        JobStoreError::AlreadyExists {
            kind,
            key: key.to_string(),
        }
    }
}
