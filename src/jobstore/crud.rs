//! Storing, retrieving and removing jobs, triggers and calendars, plus
//! read-only introspection.

use std::collections::BTreeSet;

use super::session::{Notification, Session};
use super::{JobStore, JobStoreError};
use crate::core::calendar::Calendar;
use crate::core::job::Job;
use crate::core::matcher::GroupMatcher;
use crate::core::state::{TriggerState, TriggerStatus};
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};
use crate::storage::{Storage, StoredTrigger, TriggerQuery};

impl<S: Storage> JobStore<S> {
    /// Store a job. Fails with `AlreadyExists` if the key is taken and
    /// `replace_existing` is false. Replacing a job leaves its triggers alone.
    pub async fn store_job(&self, job: Job, replace_existing: bool) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.store_job_in(&mut session, job, replace_existing)
            .await?;
        self.finish(session, guard).await
    }

    /// Store a trigger for an existing job.
    ///
    /// A trigger without fire times gets its first fire time computed here.
    /// The initial state follows the paused groups and the blocked jobs.
    pub async fn store_trigger(
        &self,
        trigger: Trigger,
        replace_existing: bool,
    ) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.store_trigger_in(&mut session, trigger, replace_existing)
            .await?;
        self.finish(session, guard).await
    }

    /// Store a new job together with a new trigger for it.
    pub async fn store_job_and_trigger(
        &self,
        job: Job,
        trigger: Trigger,
    ) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.store_job_in(&mut session, job, false).await?;
        self.store_trigger_in(&mut session, trigger, false).await?;
        self.finish(session, guard).await
    }

    /// Store jobs with their triggers in one unit.
    ///
    /// Without `replace`, any existing key fails the whole call before
    /// anything is written.
    pub async fn store_jobs_and_triggers(
        &self,
        jobs: Vec<(Job, Vec<Trigger>)>,
        replace: bool,
    ) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();

        if !replace {
            for (job, triggers) in &jobs {
                if session.job(job.key()).await?.is_some() {
                    return Err(JobStoreError::already_exists("job", job.key()));
                }
                for trigger in triggers {
                    if session.trigger(trigger.key()).await?.is_some() {
                        return Err(JobStoreError::already_exists("trigger", trigger.key()));
                    }
                }
            }
        }

        for (job, triggers) in jobs {
            self.store_job_in(&mut session, job, replace).await?;
            for trigger in triggers {
                self.store_trigger_in(&mut session, trigger, replace)
                    .await?;
            }
        }
        self.finish(session, guard).await
    }

    /// Remove a job and all of its triggers. Returns whether the job existed.
    pub async fn remove_job(&self, key: &JobKey) -> Result<bool, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        let found = self.remove_job_in(&mut session, key).await?;
        self.finish(session, guard).await?;
        Ok(found)
    }

    /// Remove several jobs. Returns whether every job existed.
    pub async fn remove_jobs(&self, keys: &[JobKey]) -> Result<bool, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        let mut all_found = true;
        for key in keys {
            all_found &= self.remove_job_in(&mut session, key).await?;
        }
        self.finish(session, guard).await?;
        Ok(all_found)
    }

    /// Remove a trigger. A non-durable job left without triggers is removed
    /// too. Returns whether the trigger existed.
    pub async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        let found = self.remove_trigger_in(&mut session, key, true).await?;
        self.finish(session, guard).await?;
        Ok(found)
    }

    /// Remove several triggers. Returns whether every trigger existed.
    pub async fn remove_triggers(&self, keys: &[TriggerKey]) -> Result<bool, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        let mut all_found = true;
        for key in keys {
            all_found &= self.remove_trigger_in(&mut session, key, true).await?;
        }
        self.finish(session, guard).await?;
        Ok(all_found)
    }

    /// Replace the trigger stored under `key` with `new_trigger`.
    ///
    /// The new trigger must belong to the same job. Returns `false` without
    /// storing anything when no trigger exists under `key`.
    pub async fn replace_trigger(
        &self,
        key: &TriggerKey,
        new_trigger: Trigger,
    ) -> Result<bool, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();

        let Some(old) = session.trigger(key).await? else {
            return Ok(false);
        };
        if old.trigger.job_key() != new_trigger.job_key() {
            return Err(JobStoreError::ReferentialIntegrity(format!(
                "replacement for trigger {} belongs to job {}, not {}",
                key,
                new_trigger.job_key(),
                old.trigger.job_key()
            )));
        }
        self.remove_trigger_in(&mut session, key, false).await?;
        self.store_trigger_in(&mut session, new_trigger, false)
            .await?;

        self.finish(session, guard).await?;
        Ok(true)
    }

    /// Store a calendar under `name`.
    ///
    /// When an existing calendar is replaced and `update_triggers` is set,
    /// every trigger bound to it has its next fire time recomputed.
    pub async fn store_calendar(
        &self,
        name: impl Into<String>,
        calendar: Calendar,
        replace_existing: bool,
        update_triggers: bool,
    ) -> Result<(), JobStoreError> {
        let name = name.into();
        calendar.validate().map_err(JobStoreError::InvalidCalendar)?;

        let guard = self.lock.lock().await;
        let mut session = self.session();

        let exists = session.calendar(&name).await?.is_some();
        if exists && !replace_existing {
            return Err(JobStoreError::already_exists("calendar", &name));
        }
        session
            .scheduler_mut()
            .await?
            .calendars
            .insert(name.clone(), calendar.clone());

        if exists && update_triggers {
            let now = self.clock.now();
            let threshold = self.misfire_threshold();
            let bound = session
                .query_triggers(&TriggerQuery::with_calendar(name.as_str()))
                .await?;
            for mut stored in bound {
                stored
                    .trigger
                    .update_with_new_calendar(Some(&calendar), threshold, now);
                tracing::debug!(
                    trigger = %stored.key(),
                    calendar = %name,
                    next_fire_time = ?stored.trigger.next_fire_time(),
                    "Recomputed fire time for replaced calendar"
                );
                session.put_trigger(stored);
            }
            session.notify(Notification::SchedulingChanged(None));
        }

        self.finish(session, guard).await
    }

    /// Remove a calendar. Fails with `CalendarInUse` while any trigger
    /// references it. Returns whether the calendar existed.
    pub async fn remove_calendar(&self, name: &str) -> Result<bool, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();

        let referencing = session
            .query_trigger_keys(&TriggerQuery::with_calendar(name))
            .await?;
        if let Some(trigger) = referencing.first() {
            return Err(JobStoreError::CalendarInUse {
                name: name.to_string(),
                trigger: trigger.to_string(),
            });
        }
        if session.calendar(name).await?.is_none() {
            return Ok(false);
        }
        session.scheduler_mut().await?.calendars.remove(name);

        self.finish(session, guard).await?;
        Ok(true)
    }

    /// Remove every job, trigger and calendar and reset the paused and
    /// blocked sets.
    pub async fn clear_all_scheduling_data(&self) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();

        let triggers = session.query_trigger_keys(&TriggerQuery::new()).await?;
        for key in &triggers {
            session.delete_trigger(key);
        }
        let jobs = session
            .storage()
            .query_job_keys(&GroupMatcher::any_group())
            .await?;
        for key in &jobs {
            session.delete_job(key);
        }

        let record = session.scheduler_mut().await?;
        record.calendars.clear();
        record.paused_job_groups.clear();
        record.paused_trigger_groups.clear();
        record.blocked_jobs.clear();

        tracing::info!(
            jobs = jobs.len(),
            triggers = triggers.len(),
            "Cleared all scheduling data"
        );
        self.finish(session, guard).await
    }

    pub async fn retrieve_job(&self, key: &JobKey) -> Result<Option<Job>, JobStoreError> {
        Ok(self.storage.load_job(key).await?)
    }

    pub async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>, JobStoreError> {
        Ok(self.storage.load_trigger(key).await?.map(|t| t.trigger))
    }

    pub async fn check_job_exists(&self, key: &JobKey) -> Result<bool, JobStoreError> {
        Ok(self.storage.load_job(key).await?.is_some())
    }

    pub async fn check_trigger_exists(&self, key: &TriggerKey) -> Result<bool, JobStoreError> {
        Ok(self.storage.load_trigger(key).await?.is_some())
    }

    /// Host-facing state of a trigger; `TriggerStatus::None` if it does not exist.
    pub async fn trigger_state(&self, key: &TriggerKey) -> Result<TriggerStatus, JobStoreError> {
        Ok(self
            .storage
            .load_trigger(key)
            .await?
            .map(|t| TriggerStatus::from(t.state))
            .unwrap_or(TriggerStatus::None))
    }

    pub async fn triggers_for_job(&self, job_key: &JobKey) -> Result<Vec<Trigger>, JobStoreError> {
        Ok(self
            .storage
            .query_triggers(&TriggerQuery::for_job(job_key))
            .await?
            .into_iter()
            .map(|t| t.trigger)
            .collect())
    }

    pub async fn retrieve_calendar(&self, name: &str) -> Result<Option<Calendar>, JobStoreError> {
        Ok(self
            .storage
            .load_scheduler(&self.instance_name)
            .await?
            .and_then(|mut record| record.calendars.remove(name)))
    }

    pub async fn calendar_exists(&self, name: &str) -> Result<bool, JobStoreError> {
        Ok(self.retrieve_calendar(name).await?.is_some())
    }

    pub async fn number_of_jobs(&self) -> Result<usize, JobStoreError> {
        Ok(self.storage.count_jobs().await?)
    }

    pub async fn number_of_triggers(&self) -> Result<usize, JobStoreError> {
        Ok(self.storage.count_triggers().await?)
    }

    pub async fn number_of_calendars(&self) -> Result<usize, JobStoreError> {
        Ok(self.calendar_names().await?.len())
    }

    pub async fn job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>, JobStoreError> {
        Ok(self.storage.query_job_keys(matcher).await?)
    }

    pub async fn trigger_keys(&self, matcher: &GroupMatcher) -> Result<Vec<TriggerKey>, JobStoreError> {
        Ok(self
            .storage
            .query_trigger_keys(&TriggerQuery::in_group(matcher.clone()))
            .await?)
    }

    pub async fn job_group_names(&self) -> Result<Vec<String>, JobStoreError> {
        Ok(self.storage.job_group_names().await?)
    }

    pub async fn trigger_group_names(&self) -> Result<Vec<String>, JobStoreError> {
        Ok(self.storage.trigger_group_names().await?)
    }

    pub async fn calendar_names(&self) -> Result<Vec<String>, JobStoreError> {
        Ok(self
            .storage
            .load_scheduler(&self.instance_name)
            .await?
            .map(|record| record.calendars.into_keys().collect())
            .unwrap_or_default())
    }

    pub(super) async fn store_job_in(
        &self,
        session: &mut Session<'_, S>,
        job: Job,
        replace_existing: bool,
    ) -> Result<(), JobStoreError> {
        if !replace_existing && session.job(job.key()).await?.is_some() {
            return Err(JobStoreError::already_exists("job", job.key()));
        }
        tracing::debug!(job = %job.key(), durable = job.is_durable(), "Storing job");
        session.put_job(job);
        Ok(())
    }

    pub(super) async fn store_trigger_in(
        &self,
        session: &mut Session<'_, S>,
        mut trigger: Trigger,
        replace_existing: bool,
    ) -> Result<(), JobStoreError> {
        trigger.validate()?;
        let key = trigger.key().clone();

        if session.trigger(&key).await?.is_some() {
            if !replace_existing {
                return Err(JobStoreError::already_exists("trigger", &key));
            }
            self.remove_trigger_in(session, &key, false).await?;
        }

        if session.job(trigger.job_key()).await?.is_none() {
            return Err(JobStoreError::ReferentialIntegrity(format!(
                "trigger {} references missing job {}",
                key,
                trigger.job_key()
            )));
        }

        let calendar = match trigger.calendar_name() {
            Some(name) => match session.calendar(name).await? {
                Some(calendar) => Some(calendar),
                None => {
                    return Err(JobStoreError::ReferentialIntegrity(format!(
                        "trigger {} references missing calendar {}",
                        key, name
                    )));
                }
            },
            None => None,
        };

        let unscheduled =
            trigger.next_fire_time().is_none() && trigger.previous_fire_time().is_none();
        if unscheduled && trigger.compute_first_fire_time(calendar.as_ref()).is_none() {
            return Err(JobStoreError::WillNeverFire(key.to_string()));
        }

        let record = session.scheduler().await?;
        let state = TriggerState::initial(
            record.is_paused_for(&trigger),
            record.is_job_blocked(trigger.job_key()),
        );
        let next_fire_time = trigger.next_fire_time();

        tracing::debug!(
            trigger = %key,
            job = %trigger.job_key(),
            state = %state,
            next_fire_time = ?next_fire_time,
            "Storing trigger"
        );
        session.put_trigger(StoredTrigger::new(trigger, state));
        if state == TriggerState::Waiting {
            session.notify(Notification::SchedulingChanged(next_fire_time));
        }
        Ok(())
    }

    pub(super) async fn remove_job_in(
        &self,
        session: &mut Session<'_, S>,
        key: &JobKey,
    ) -> Result<bool, JobStoreError> {
        let triggers = session
            .query_trigger_keys(&TriggerQuery::for_job(key))
            .await?;
        for trigger in &triggers {
            self.remove_trigger_in(session, trigger, false).await?;
        }

        if session.job(key).await?.is_none() {
            return Ok(false);
        }
        session.delete_job(key);
        if session.is_job_blocked(key).await? {
            session.scheduler_mut().await?.unblock_job(key);
        }
        tracing::debug!(job = %key, triggers = triggers.len(), "Removed job");
        Ok(true)
    }

    /// Delete a trigger; with `remove_orphaned_job`, also delete its job when
    /// that job is non-durable and has no triggers left.
    pub(super) async fn remove_trigger_in(
        &self,
        session: &mut Session<'_, S>,
        key: &TriggerKey,
        remove_orphaned_job: bool,
    ) -> Result<bool, JobStoreError> {
        let Some(stored) = session.trigger(key).await? else {
            return Ok(false);
        };
        session.delete_trigger(key);
        tracing::debug!(trigger = %key, "Removed trigger");

        if remove_orphaned_job {
            let job_key = stored.trigger.job_key();
            let remaining = session
                .query_trigger_keys(&TriggerQuery::for_job(job_key))
                .await?;
            if remaining.is_empty() {
                if let Some(job) = session.job(job_key).await? {
                    if !job.is_durable() {
                        session.delete_job(job_key);
                        session.notify(Notification::JobDeleted(job_key.clone()));
                        tracing::debug!(job = %job_key, "Removed non-durable job with no triggers");
                    }
                }
            }
        }
        Ok(true)
    }

    /// Keys of every trigger currently in one of `states`.
    pub(super) async fn trigger_keys_in_states(
        &self,
        session: &mut Session<'_, S>,
        states: impl IntoIterator<Item = TriggerState>,
    ) -> Result<BTreeSet<TriggerKey>, JobStoreError> {
        Ok(session
            .query_trigger_keys(&TriggerQuery::new().with_states(states))
            .await?
            .into_iter()
            .collect())
    }
}
