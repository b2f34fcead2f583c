//! Storage abstraction for jobs, triggers and scheduler records.
//!
//! The job store keeps no authoritative state of its own: everything lives
//! behind the [`Storage`] trait, which offers load-by-key, predicate queries
//! with key projection, and an all-or-nothing [`WriteBatch`] commit. Backends
//! are pluggable (in-memory, SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::core::calendar::Calendar;
use crate::core::job::Job;
use crate::core::matcher::GroupMatcher;
use crate::core::state::TriggerState;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// A trigger together with its scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrigger {
    pub trigger: Trigger,
    pub state: TriggerState,
}

impl StoredTrigger {
    pub fn new(trigger: Trigger, state: TriggerState) -> Self {
        Self { trigger, state }
    }

    pub fn key(&self) -> &TriggerKey {
        self.trigger.key()
    }

    /// Move to `next` if the transition is legal.
    pub fn transition(&mut self, next: TriggerState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            tracing::warn!(
                trigger = %self.trigger.key(),
                from = %self.state,
                to = %next,
                "Ignoring illegal trigger state transition"
            );
            false
        }
    }
}

/// Per-instance scheduler record.
///
/// Holds the paused group sets, the blocked job set and the calendars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerRecord {
    pub instance_name: String,
    pub state: String,
    #[serde(default)]
    pub paused_job_groups: BTreeSet<String>,
    #[serde(default)]
    pub paused_trigger_groups: BTreeSet<String>,
    #[serde(default)]
    pub blocked_jobs: BTreeSet<JobKey>,
    #[serde(default)]
    pub calendars: BTreeMap<String, Calendar>,
}

impl SchedulerRecord {
    /// A fresh record for an instance that has never started.
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            state: "Initialized".to_string(),
            paused_job_groups: BTreeSet::new(),
            paused_trigger_groups: BTreeSet::new(),
            blocked_jobs: BTreeSet::new(),
            calendars: BTreeMap::new(),
        }
    }

    /// Whether a trigger with this key and job starts paused.
    pub fn is_paused_for(&self, trigger: &Trigger) -> bool {
        self.paused_trigger_groups.contains(trigger.key().group())
            || self.paused_job_groups.contains(trigger.job_key().group())
    }

    pub fn is_job_blocked(&self, job_key: &JobKey) -> bool {
        self.blocked_jobs.contains(job_key)
    }

    pub fn block_job(&mut self, job_key: JobKey) {
        self.blocked_jobs.insert(job_key);
    }

    pub fn unblock_job(&mut self, job_key: &JobKey) -> bool {
        self.blocked_jobs.remove(job_key)
    }
}

/// Predicate over stored triggers.
///
/// All set conditions must hold. Backends may push them down into their own
/// query language; [`TriggerQuery::matches`] is the reference semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerQuery {
    pub job_key: Option<JobKey>,
    pub group: Option<GroupMatcher>,
    /// Empty means any state.
    pub states: Vec<TriggerState>,
    pub calendar_name: Option<String>,
    /// Only triggers with a next fire time at or before this instant.
    pub next_fire_not_after: Option<DateTime<Utc>>,
}

impl TriggerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_job(job_key: &JobKey) -> Self {
        Self {
            job_key: Some(job_key.clone()),
            ..Self::default()
        }
    }

    pub fn in_group(matcher: GroupMatcher) -> Self {
        Self {
            group: Some(matcher),
            ..Self::default()
        }
    }

    pub fn with_calendar(calendar_name: impl Into<String>) -> Self {
        Self {
            calendar_name: Some(calendar_name.into()),
            ..Self::default()
        }
    }

    pub fn with_states(mut self, states: impl IntoIterator<Item = TriggerState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn due_not_after(mut self, time: DateTime<Utc>) -> Self {
        self.next_fire_not_after = Some(time);
        self
    }

    pub fn matches(&self, stored: &StoredTrigger) -> bool {
        let trigger = &stored.trigger;
        if self.job_key.as_ref().is_some_and(|k| k != trigger.job_key()) {
            return false;
        }
        if self
            .group
            .as_ref()
            .is_some_and(|m| !m.matches(trigger.key().group()))
        {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&stored.state) {
            return false;
        }
        if let Some(name) = &self.calendar_name {
            if trigger.calendar_name() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(limit) = self.next_fire_not_after {
            match trigger.next_fire_time() {
                Some(next) if next <= limit => {}
                _ => return false,
            }
        }
        true
    }
}

/// One write inside a batch.
#[derive(Debug, Clone)]
pub enum Mutation {
    PutJob(Job),
    DeleteJob(JobKey),
    PutTrigger(StoredTrigger),
    DeleteTrigger(TriggerKey),
    PutScheduler(SchedulerRecord),
}

/// Mutations committed together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn put_job(&mut self, job: Job) {
        self.push(Mutation::PutJob(job));
    }

    pub fn delete_job(&mut self, key: JobKey) {
        self.push(Mutation::DeleteJob(key));
    }

    pub fn put_trigger(&mut self, trigger: StoredTrigger) {
        self.push(Mutation::PutTrigger(trigger));
    }

    pub fn delete_trigger(&mut self, key: TriggerKey) {
        self.push(Mutation::DeleteTrigger(key));
    }

    pub fn put_scheduler(&mut self, record: SchedulerRecord) {
        self.push(Mutation::PutScheduler(record));
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

/// Storage backend trait.
///
/// Lookups return `Ok(None)` for missing records. Result lists are ordered
/// by key so callers see a stable order.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_job(&self, key: &JobKey) -> Result<Option<Job>, StorageError>;

    async fn load_trigger(&self, key: &TriggerKey) -> Result<Option<StoredTrigger>, StorageError>;

    async fn load_scheduler(
        &self,
        instance_name: &str,
    ) -> Result<Option<SchedulerRecord>, StorageError>;

    /// Triggers matching the query.
    async fn query_triggers(&self, query: &TriggerQuery)
    -> Result<Vec<StoredTrigger>, StorageError>;

    /// Keys of triggers matching the query.
    async fn query_trigger_keys(
        &self,
        query: &TriggerQuery,
    ) -> Result<Vec<TriggerKey>, StorageError>;

    /// Keys of jobs whose group matches.
    async fn query_job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>, StorageError>;

    async fn job_group_names(&self) -> Result<Vec<String>, StorageError>;

    async fn trigger_group_names(&self) -> Result<Vec<String>, StorageError>;

    async fn count_jobs(&self) -> Result<usize, StorageError>;

    async fn count_triggers(&self) -> Result<usize, StorageError>;

    /// Apply every mutation atomically, in order.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;
}
