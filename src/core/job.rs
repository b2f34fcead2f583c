//! Job definitions.
//!
//! A [`Job`] is the unit of work a trigger causes to run. The store only
//! keeps its identity, behavioral flags and an opaque data map; how the work
//! is performed is the host executor's business.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use super::types::JobKey;

/// Opaque key/value data carried by jobs and triggers.
pub type JobDataMap = HashMap<String, Value>;

/// A stored job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    key: JobKey,
    #[serde(default)]
    description: Option<String>,
    /// Survives with no triggers attached.
    #[serde(default)]
    durable: bool,
    #[serde(default)]
    concurrent_execution_disallowed: bool,
    #[serde(default)]
    persist_job_data_after_execution: bool,
    #[serde(default)]
    requests_recovery: bool,
    #[serde(default)]
    job_data: JobDataMap,
}

impl Job {
    /// Create a non-durable job that allows concurrent execution.
    pub fn new(key: JobKey) -> Self {
        Self {
            key,
            description: None,
            durable: false,
            concurrent_execution_disallowed: false,
            persist_job_data_after_execution: false,
            requests_recovery: false,
            job_data: JobDataMap::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Keep the job when its last trigger is removed.
    pub fn with_durability(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Forbid overlapping executions of this job.
    pub fn with_concurrent_execution_disallowed(mut self, disallowed: bool) -> Self {
        self.concurrent_execution_disallowed = disallowed;
        self
    }

    /// Write the executor's data map back after each execution.
    pub fn with_persist_job_data_after_execution(mut self, persist: bool) -> Self {
        self.persist_job_data_after_execution = persist;
        self
    }

    /// Request a recovery firing if the scheduler stops mid-execution.
    pub fn with_requests_recovery(mut self, requests_recovery: bool) -> Self {
        self.requests_recovery = requests_recovery;
        self
    }

    /// Replace the data map.
    pub fn with_job_data(mut self, data: JobDataMap) -> Self {
        self.job_data = data;
        self
    }

    /// Add a single data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.job_data.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_concurrent_execution_disallowed(&self) -> bool {
        self.concurrent_execution_disallowed
    }

    pub fn is_persist_job_data_after_execution(&self) -> bool {
        self.persist_job_data_after_execution
    }

    pub fn requests_recovery(&self) -> bool {
        self.requests_recovery
    }

    pub fn job_data(&self) -> &JobDataMap {
        &self.job_data
    }

    pub fn job_data_mut(&mut self) -> &mut JobDataMap {
        &mut self.job_data
    }

    /// Replace the data map in place.
    pub fn set_job_data(&mut self, data: JobDataMap) {
        self.job_data = data;
    }

    /// Get a typed value from the data map.
    pub fn get_data<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.job_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Error reported by a job executor.
///
/// The flags let a job ask for its triggers to be unscheduled, which turns
/// into the matching completion instruction.
#[derive(Debug, Clone, Error)]
#[error("job execution failed: {message}")]
pub struct JobExecutionError {
    message: String,
    unschedule_firing_trigger: bool,
    unschedule_all_triggers: bool,
}

impl JobExecutionError {
    /// Create a plain execution failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            unschedule_firing_trigger: false,
            unschedule_all_triggers: false,
        }
    }

    /// Ask for the trigger that fired this execution to be completed.
    pub fn unschedule_firing_trigger(mut self) -> Self {
        self.unschedule_firing_trigger = true;
        self
    }

    /// Ask for every trigger of the job to be completed.
    pub fn unschedule_all_triggers(mut self) -> Self {
        self.unschedule_all_triggers = true;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn should_unschedule_firing_trigger(&self) -> bool {
        self.unschedule_firing_trigger
    }

    pub fn should_unschedule_all_triggers(&self) -> bool {
        self.unschedule_all_triggers
    }
}
