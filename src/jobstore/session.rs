//! Unit of work over the store.
//!
//! A [`Session`] loads records on demand, keeps every loaded or written
//! record in an identity map, and turns the dirty ones into a single
//! [`WriteBatch`] on commit. Reads inside a session see the session's own
//! uncommitted writes. Host notifications raised during the work are held
//! back until the batch has been committed.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::core::calendar::Calendar;
use crate::core::job::Job;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};
use crate::storage::{SchedulerRecord, Storage, StorageError, StoredTrigger, TriggerQuery, WriteBatch};

/// Host callback raised by an operation, delivered after commit.
#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Misfired(Trigger),
    Finalized(Trigger),
    JobDeleted(JobKey),
    SchedulingChanged(Option<DateTime<Utc>>),
}

/// A loaded record; `None` means absent or deleted in this session.
#[derive(Debug)]
struct Entry<T> {
    value: Option<T>,
    dirty: bool,
}

impl<T> Entry<T> {
    fn clean(value: Option<T>) -> Self {
        Self {
            value,
            dirty: false,
        }
    }

    fn dirty(value: Option<T>) -> Self {
        Self { value, dirty: true }
    }
}

pub(crate) struct Session<'a, S: Storage> {
    storage: &'a S,
    instance_name: &'a str,
    jobs: BTreeMap<JobKey, Entry<Job>>,
    triggers: BTreeMap<TriggerKey, Entry<StoredTrigger>>,
    scheduler: Option<SchedulerRecord>,
    scheduler_dirty: bool,
    notifications: Vec<Notification>,
}

impl<'a, S: Storage> Session<'a, S> {
    pub(crate) fn new(storage: &'a S, instance_name: &'a str) -> Self {
        Self {
            storage,
            instance_name,
            jobs: BTreeMap::new(),
            triggers: BTreeMap::new(),
            scheduler: None,
            scheduler_dirty: false,
            notifications: Vec::new(),
        }
    }

    pub(crate) fn storage(&self) -> &'a S {
        self.storage
    }

    pub(crate) async fn job(&mut self, key: &JobKey) -> Result<Option<Job>, StorageError> {
        if let Some(entry) = self.jobs.get(key) {
            return Ok(entry.value.clone());
        }
        let job = self.storage.load_job(key).await?;
        self.jobs.insert(key.clone(), Entry::clean(job.clone()));
        Ok(job)
    }

    pub(crate) fn put_job(&mut self, job: Job) {
        self.jobs.insert(job.key().clone(), Entry::dirty(Some(job)));
    }

    pub(crate) fn delete_job(&mut self, key: &JobKey) {
        self.jobs.insert(key.clone(), Entry::dirty(None));
    }

    pub(crate) async fn trigger(
        &mut self,
        key: &TriggerKey,
    ) -> Result<Option<StoredTrigger>, StorageError> {
        if let Some(entry) = self.triggers.get(key) {
            return Ok(entry.value.clone());
        }
        let trigger = self.storage.load_trigger(key).await?;
        self.triggers
            .insert(key.clone(), Entry::clean(trigger.clone()));
        Ok(trigger)
    }

    pub(crate) fn put_trigger(&mut self, trigger: StoredTrigger) {
        self.triggers
            .insert(trigger.key().clone(), Entry::dirty(Some(trigger)));
    }

    pub(crate) fn delete_trigger(&mut self, key: &TriggerKey) {
        self.triggers.insert(key.clone(), Entry::dirty(None));
    }

    /// Triggers matching `query`, with this session's writes applied.
    pub(crate) async fn query_triggers(
        &mut self,
        query: &TriggerQuery,
    ) -> Result<Vec<StoredTrigger>, StorageError> {
        let stored = self.storage.query_triggers(query).await?;
        let mut merged: BTreeMap<TriggerKey, StoredTrigger> = BTreeMap::new();

        for trigger in stored {
            let key = trigger.key().clone();
            match self.triggers.get(&key) {
                Some(entry) => {
                    if let Some(current) = &entry.value {
                        if query.matches(current) {
                            merged.insert(key, current.clone());
                        }
                    }
                }
                None => {
                    self.triggers
                        .insert(key.clone(), Entry::clean(Some(trigger.clone())));
                    merged.insert(key, trigger);
                }
            }
        }

        // Session writes the store has not seen yet.
        for (key, entry) in &self.triggers {
            if !entry.dirty || merged.contains_key(key) {
                continue;
            }
            if let Some(current) = &entry.value {
                if query.matches(current) {
                    merged.insert(key.clone(), current.clone());
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    pub(crate) async fn query_trigger_keys(
        &mut self,
        query: &TriggerQuery,
    ) -> Result<Vec<TriggerKey>, StorageError> {
        if !self.triggers.values().any(|e| e.dirty) {
            return self.storage.query_trigger_keys(query).await;
        }
        Ok(self
            .query_triggers(query)
            .await?
            .into_iter()
            .map(|t| t.trigger.key().clone())
            .collect())
    }

    /// The scheduler record, loaded or created on first use.
    pub(crate) async fn scheduler(&mut self) -> Result<&SchedulerRecord, StorageError> {
        self.load_scheduler().await?;
        let name = self.instance_name;
        Ok(self
            .scheduler
            .get_or_insert_with(|| SchedulerRecord::new(name)))
    }

    /// The scheduler record for modification; it is written on commit.
    pub(crate) async fn scheduler_mut(&mut self) -> Result<&mut SchedulerRecord, StorageError> {
        self.load_scheduler().await?;
        self.scheduler_dirty = true;
        let name = self.instance_name;
        Ok(self
            .scheduler
            .get_or_insert_with(|| SchedulerRecord::new(name)))
    }

    async fn load_scheduler(&mut self) -> Result<(), StorageError> {
        if self.scheduler.is_none() {
            self.scheduler = self.storage.load_scheduler(self.instance_name).await?;
        }
        Ok(())
    }

    pub(crate) async fn calendar(&mut self, name: &str) -> Result<Option<Calendar>, StorageError> {
        Ok(self.scheduler().await?.calendars.get(name).cloned())
    }

    pub(crate) async fn is_job_blocked(&mut self, key: &JobKey) -> Result<bool, StorageError> {
        Ok(self.scheduler().await?.is_job_blocked(key))
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Write every dirty record in one batch and hand back the notifications.
    pub(crate) async fn commit(self) -> Result<Vec<Notification>, StorageError> {
        let mut batch = WriteBatch::new();

        for (key, entry) in self.jobs {
            if !entry.dirty {
                continue;
            }
            match entry.value {
                Some(job) => batch.put_job(job),
                None => batch.delete_job(key),
            }
        }
        for (key, entry) in self.triggers {
            if !entry.dirty {
                continue;
            }
            match entry.value {
                Some(trigger) => batch.put_trigger(trigger),
                None => batch.delete_trigger(key),
            }
        }
        if self.scheduler_dirty {
            if let Some(record) = self.scheduler {
                batch.put_scheduler(record);
            }
        }

        if !batch.is_empty() {
            tracing::trace!(mutations = batch.len(), "Committing job store batch");
            self.storage.commit(batch).await?;
        }
        Ok(self.notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schedule::SimpleSchedule;
    use crate::core::state::TriggerState;
    use crate::storage::InMemoryStorage;

    fn stored(name: &str, state: TriggerState) -> StoredTrigger {
        StoredTrigger::new(
            Trigger::new(
                TriggerKey::new(name, "g"),
                JobKey::new("job", "g"),
                SimpleSchedule::once(),
            ),
            state,
        )
    }

    #[tokio::test]
    async fn test_reads_see_uncommitted_writes() {
        let storage = InMemoryStorage::new();
        let mut batch = WriteBatch::new();
        batch.put_trigger(stored("a", TriggerState::Waiting));
        batch.put_trigger(stored("b", TriggerState::Waiting));
        storage.commit(batch).await.unwrap();

        let mut session = Session::new(&storage, "main");
        let mut a = session
            .trigger(&TriggerKey::new("a", "g"))
            .await
            .unwrap()
            .unwrap();
        a.state = TriggerState::Acquired;
        session.put_trigger(a);
        session.delete_trigger(&TriggerKey::new("b", "g"));
        session.put_trigger(stored("c", TriggerState::Waiting));

        let waiting = session
            .query_trigger_keys(&TriggerQuery::new().with_states([TriggerState::Waiting]))
            .await
            .unwrap();
        assert_eq!(waiting, vec![TriggerKey::new("c", "g")]);

        // Nothing reaches the store before commit.
        assert_eq!(storage.count_triggers().await.unwrap(), 2);
        session.commit().await.unwrap();
        assert_eq!(storage.count_triggers().await.unwrap(), 2);
        let a = storage
            .load_trigger(&TriggerKey::new("a", "g"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.state, TriggerState::Acquired);
    }

    #[tokio::test]
    async fn test_scheduler_record_written_only_when_modified() {
        let storage = InMemoryStorage::new();

        let mut session = Session::new(&storage, "main");
        assert_eq!(session.scheduler().await.unwrap().instance_name, "main");
        session.commit().await.unwrap();
        assert!(storage.load_scheduler("main").await.unwrap().is_none());

        let mut session = Session::new(&storage, "main");
        session
            .scheduler_mut()
            .await
            .unwrap()
            .paused_job_groups
            .insert("reports".into());
        session.notify(Notification::SchedulingChanged(None));
        let notifications = session.commit().await.unwrap();
        assert_eq!(notifications.len(), 1);
        let record = storage.load_scheduler("main").await.unwrap().unwrap();
        assert!(record.paused_job_groups.contains("reports"));
    }
}
