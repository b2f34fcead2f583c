//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use super::{Mutation, SchedulerRecord, Storage, StorageError, StoredTrigger, TriggerQuery, WriteBatch};
use crate::core::job::Job;
use crate::core::matcher::GroupMatcher;
use crate::core::types::{JobKey, TriggerKey};

#[derive(Default)]
struct Records {
    jobs: HashMap<JobKey, Job>,
    triggers: HashMap<TriggerKey, StoredTrigger>,
    schedulers: HashMap<String, SchedulerRecord>,
}

/// In-memory storage backend.
///
/// A single lock guards all records, so a batch is applied under one write
/// guard. Data is not persisted across restarts.
pub struct InMemoryStorage {
    records: RwLock<Records>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    fn matching(&self, query: &TriggerQuery) -> Result<Vec<StoredTrigger>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = records
            .triggers
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(result)
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn load_job(&self, key: &JobKey) -> Result<Option<Job>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.jobs.get(key).cloned())
    }

    async fn load_trigger(&self, key: &TriggerKey) -> Result<Option<StoredTrigger>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.triggers.get(key).cloned())
    }

    async fn load_scheduler(
        &self,
        instance_name: &str,
    ) -> Result<Option<SchedulerRecord>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.schedulers.get(instance_name).cloned())
    }

    async fn query_triggers(
        &self,
        query: &TriggerQuery,
    ) -> Result<Vec<StoredTrigger>, StorageError> {
        self.matching(query)
    }

    async fn query_trigger_keys(
        &self,
        query: &TriggerQuery,
    ) -> Result<Vec<TriggerKey>, StorageError> {
        Ok(self
            .matching(query)?
            .into_iter()
            .map(|t| t.trigger.key().clone())
            .collect())
    }

    async fn query_job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut keys: Vec<_> = records
            .jobs
            .keys()
            .filter(|k| matcher.matches(k.group()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn job_group_names(&self) -> Result<Vec<String>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        let groups: BTreeSet<_> = records.jobs.keys().map(|k| k.group().to_string()).collect();
        Ok(groups.into_iter().collect())
    }

    async fn trigger_group_names(&self) -> Result<Vec<String>, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        let groups: BTreeSet<_> = records
            .triggers
            .keys()
            .map(|k| k.group().to_string())
            .collect();
        Ok(groups.into_iter().collect())
    }

    async fn count_jobs(&self) -> Result<usize, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.jobs.len())
    }

    async fn count_triggers(&self) -> Result<usize, StorageError> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.triggers.len())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut records = self.records.write().map_err(|_| StorageError::LockPoisoned)?;
        for mutation in batch {
            match mutation {
                Mutation::PutJob(job) => {
                    records.jobs.insert(job.key().clone(), job);
                }
                Mutation::DeleteJob(key) => {
                    records.jobs.remove(&key);
                }
                Mutation::PutTrigger(trigger) => {
                    records.triggers.insert(trigger.key().clone(), trigger);
                }
                Mutation::DeleteTrigger(key) => {
                    records.triggers.remove(&key);
                }
                Mutation::PutScheduler(record) => {
                    records
                        .schedulers
                        .insert(record.instance_name.clone(), record);
                }
            }
        }
        Ok(())
    }
}
