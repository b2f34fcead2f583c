//! Configuration type definitions.
//!
//! This module contains the type definitions for the YAML configuration
//! document: scheduler settings, storage, calendars, jobs and their triggers.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::schedule::IntervalUnit;
use crate::core::trigger::{DEFAULT_PRIORITY, MisfireInstruction};
use crate::core::types::DEFAULT_GROUP;

/// Top-level configuration (cadence.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Exclusion calendars.
    pub calendars: Vec<CalendarConfig>,
    /// Jobs with their triggers.
    pub jobs: Vec<JobConfig>,
}

/// Scheduler and job store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name of the scheduler record in storage.
    pub instance_name: String,
    /// How late a trigger may be before it counts as misfired.
    pub misfire_threshold_ms: u64,
    /// Maximum triggers acquired per pass.
    pub batch_size: usize,
    /// Extra look-ahead for joining a batch.
    pub time_window_ms: u64,
    /// Wait between passes when nothing is due.
    pub idle_wait_ms: u64,
    /// Maximum concurrent executions.
    pub max_concurrent_jobs: Option<usize>,
    /// Graceful shutdown timeout.
    pub shutdown_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_name: crate::jobstore::DEFAULT_INSTANCE_NAME.to_string(),
            misfire_threshold_ms: 5_000,
            batch_size: 1,
            time_window_ms: 0,
            idle_wait_ms: 1_000,
            max_concurrent_jobs: None,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Calendar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Calendar name triggers refer to.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Timezone the excluded days are evaluated in.
    pub timezone: Option<String>,
    /// Excluded dates (YYYY-MM-DD).
    #[serde(default)]
    pub excluded_dates: Vec<NaiveDate>,
    /// Excluded weekdays (Mon, Tue, ...).
    #[serde(default)]
    pub excluded_weekdays: Vec<Weekday>,
}

/// Job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name.
    pub name: String,
    /// Job group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Optional description.
    pub description: Option<String>,
    /// Keep the job when it has no triggers.
    #[serde(default)]
    pub durable: bool,
    /// Never run two executions of this job at once.
    #[serde(default)]
    pub concurrent_execution_disallowed: bool,
    /// Store data map changes made during execution.
    #[serde(default)]
    pub persist_job_data_after_execution: bool,
    /// Re-run the job after a crash interrupted it.
    #[serde(default)]
    pub requests_recovery: bool,
    /// Job data map.
    #[serde(default)]
    pub data: HashMap<String, serde_yaml::Value>,
    /// Triggers firing this job.
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

impl JobConfig {
    /// "group.name" form of the job key.
    pub fn key_string(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }
}

/// Trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger name.
    pub name: String,
    /// Trigger group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Optional description.
    pub description: Option<String>,
    /// Priority among triggers due at the same time.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Name of an exclusion calendar.
    pub calendar: Option<String>,
    /// Misfire handling.
    #[serde(default)]
    pub misfire_instruction: MisfireInstruction,
    /// When the trigger starts (default: now).
    pub start_at: Option<DateTime<Utc>>,
    /// When the trigger stops.
    pub end_at: Option<DateTime<Utc>>,
    /// Trigger data map, overriding job data.
    #[serde(default)]
    pub data: HashMap<String, serde_yaml::Value>,
    /// Schedule.
    pub schedule: ScheduleConfig,
}

impl TriggerConfig {
    /// "group.name" form of the trigger key.
    pub fn key_string(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Cron expression.
    Cron {
        expression: String,
        timezone: Option<String>,
    },
    /// Fixed interval with an optional repeat count.
    Simple {
        interval_ms: u64,
        /// Number of repeats after the first firing (None = forever).
        repeat_count: Option<u32>,
    },
    /// Calendar-aware interval (days, months, ...).
    CalendarInterval {
        interval: u32,
        unit: IntervalUnit,
        timezone: Option<String>,
        #[serde(default)]
        preserve_hour_of_day_across_daylight_savings: bool,
        #[serde(default)]
        skip_day_if_hour_does_not_exist: bool,
    },
    /// Interval inside a daily time window.
    DailyTimeInterval {
        interval: u32,
        unit: IntervalUnit,
        start_time: NaiveTime,
        end_time: NaiveTime,
        #[serde(default)]
        days: Vec<Weekday>,
        repeat_count: Option<u32>,
        timezone: Option<String>,
    },
}
