//! cadence - persistent trigger scheduling.
//!
//! A [`JobStore`] keeps jobs, triggers and calendars in a pluggable
//! [`Storage`] backend and answers the questions a scheduler asks: which
//! triggers are due, what happens when one fires, how an execution outcome
//! changes the schedule, and what to do about missed fire times. The
//! [`Scheduler`] drives it with a tokio loop.

pub mod config;
pub mod core;
pub mod events;
pub mod jobstore;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{CadenceConfig, ConfigBuilder, ConfigError, YamlLoader};
pub use core::calendar::Calendar;
pub use core::clock::{Clock, SystemClock};
pub use core::job::{Job, JobDataMap, JobExecutionError};
pub use core::matcher::{GroupMatcher, StringOperator};
pub use core::schedule::{
    CalendarIntervalSchedule, CronSchedule, DailyTimeIntervalSchedule, IntervalUnit, ScheduleError,
    ScheduleKind, SimpleSchedule,
};
pub use core::state::{TriggerState, TriggerStatus};
pub use core::trigger::{CompletedExecutionInstruction, MisfireInstruction, Trigger};
pub use core::types::{DEFAULT_GROUP, JobKey, TriggerKey};
pub use events::{Event, EventBus, EventHandler, SchedulerSignaler};
pub use jobstore::{JobStore, JobStoreError, RecoveryReport, TriggerFiredBundle};
pub use scheduler::{
    CommandExecutor, JobExecutionContext, JobExecutor, Scheduler, SchedulerError, SchedulerHandle,
    SchedulerState,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{InMemoryStorage, Storage, StorageError};
