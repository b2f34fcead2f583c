//! Pausing and resuming triggers, jobs and groups.
//!
//! Paused groups are remembered by name in the scheduler record, so a
//! trigger stored later into a paused trigger group, or for a job in a
//! paused job group, starts out paused. Because the registry holds names,
//! group operations only accept equality matchers.

use std::collections::BTreeSet;

use super::session::{Notification, Session};
use super::{JobStore, JobStoreError};
use crate::core::matcher::GroupMatcher;
use crate::core::types::{JobKey, TriggerKey};
use crate::storage::{Storage, TriggerQuery};

impl<S: Storage> JobStore<S> {
    /// Pause one trigger. Completed and errored triggers are left alone.
    pub async fn pause_trigger(&self, key: &TriggerKey) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.pause_trigger_in(&mut session, key).await?;
        self.finish(session, guard).await
    }

    /// Pause every trigger in the group and remember the group as paused.
    /// Returns the paused group names.
    pub async fn pause_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>, JobStoreError> {
        let group = equality_group(matcher)?;
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.pause_trigger_group_in(&mut session, &group).await?;
        self.finish(session, guard).await?;
        Ok(vec![group])
    }

    /// Pause every trigger of a job.
    pub async fn pause_job(&self, key: &JobKey) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.pause_job_in(&mut session, key).await?;
        self.finish(session, guard).await
    }

    /// Pause every job in the group and remember the group as paused.
    /// Returns the paused group names.
    pub async fn pause_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>, JobStoreError> {
        let group = equality_group(matcher)?;
        let guard = self.lock.lock().await;
        let mut session = self.session();

        session
            .scheduler_mut()
            .await?
            .paused_job_groups
            .insert(group.clone());
        let jobs = session
            .storage()
            .query_job_keys(&GroupMatcher::group_equals(group.as_str()))
            .await?;
        for job in &jobs {
            self.pause_job_in(&mut session, job).await?;
        }
        tracing::info!(group = %group, jobs = jobs.len(), "Paused job group");

        self.finish(session, guard).await?;
        Ok(vec![group])
    }

    /// Pause every trigger group, existing ones included.
    pub async fn pause_all(&self) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        for group in session.storage().trigger_group_names().await? {
            self.pause_trigger_group_in(&mut session, &group).await?;
        }
        self.finish(session, guard).await
    }

    /// Resume one trigger.
    ///
    /// It becomes `Blocked` when its job is blocked, `Waiting` otherwise,
    /// and missed fire times go through misfire handling.
    pub async fn resume_trigger(&self, key: &TriggerKey) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.resume_trigger_in(&mut session, key).await?;
        self.finish(session, guard).await
    }

    /// Resume the triggers of a group and forget it as paused. Triggers
    /// whose job group is paused stay paused. Returns the resumed group names.
    pub async fn resume_triggers(
        &self,
        matcher: &GroupMatcher,
    ) -> Result<Vec<String>, JobStoreError> {
        let group = equality_group(matcher)?;
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.resume_trigger_group_in(&mut session, &group).await?;
        self.finish(session, guard).await?;
        Ok(vec![group])
    }

    /// Resume every trigger of a job.
    pub async fn resume_job(&self, key: &JobKey) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        self.resume_job_in(&mut session, key).await?;
        self.finish(session, guard).await
    }

    /// Resume the jobs of a group and forget it as paused. Returns the
    /// resumed group names.
    pub async fn resume_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>, JobStoreError> {
        let group = equality_group(matcher)?;
        let guard = self.lock.lock().await;
        let mut session = self.session();

        session
            .scheduler_mut()
            .await?
            .paused_job_groups
            .remove(&group);
        let jobs = session
            .storage()
            .query_job_keys(&GroupMatcher::group_equals(group.as_str()))
            .await?;
        for job in &jobs {
            self.resume_job_in(&mut session, job).await?;
        }
        tracing::info!(group = %group, jobs = jobs.len(), "Resumed job group");

        self.finish(session, guard).await?;
        Ok(vec![group])
    }

    /// Resume everything: forget all paused job groups and resume every
    /// trigger group.
    pub async fn resume_all(&self) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();

        let record = session.scheduler_mut().await?;
        record.paused_job_groups.clear();
        let mut groups: BTreeSet<String> = std::mem::take(&mut record.paused_trigger_groups);
        groups.extend(session.storage().trigger_group_names().await?);
        for group in &groups {
            self.resume_trigger_group_in(&mut session, group).await?;
        }

        self.finish(session, guard).await
    }

    pub async fn paused_trigger_groups(&self) -> Result<BTreeSet<String>, JobStoreError> {
        Ok(self
            .storage
            .load_scheduler(&self.instance_name)
            .await?
            .map(|r| r.paused_trigger_groups)
            .unwrap_or_default())
    }

    pub async fn paused_job_groups(&self) -> Result<BTreeSet<String>, JobStoreError> {
        Ok(self
            .storage
            .load_scheduler(&self.instance_name)
            .await?
            .map(|r| r.paused_job_groups)
            .unwrap_or_default())
    }

    pub async fn is_trigger_group_paused(&self, group: &str) -> Result<bool, JobStoreError> {
        Ok(self.paused_trigger_groups().await?.contains(group))
    }

    pub async fn is_job_group_paused(&self, group: &str) -> Result<bool, JobStoreError> {
        Ok(self.paused_job_groups().await?.contains(group))
    }

    /// Jobs with a non-concurrent execution in flight.
    pub async fn blocked_jobs(&self) -> Result<BTreeSet<JobKey>, JobStoreError> {
        Ok(self
            .storage
            .load_scheduler(&self.instance_name)
            .await?
            .map(|r| r.blocked_jobs)
            .unwrap_or_default())
    }

    async fn pause_trigger_in(
        &self,
        session: &mut Session<'_, S>,
        key: &TriggerKey,
    ) -> Result<(), JobStoreError> {
        let Some(mut stored) = session.trigger(key).await? else {
            return Ok(());
        };
        if let Some(next) = stored.state.paused()
            && stored.state != next
            && stored.transition(next)
        {
            tracing::debug!(trigger = %key, state = %next, "Paused trigger");
            session.put_trigger(stored);
        }
        Ok(())
    }

    async fn pause_trigger_group_in(
        &self,
        session: &mut Session<'_, S>,
        group: &str,
    ) -> Result<(), JobStoreError> {
        session
            .scheduler_mut()
            .await?
            .paused_trigger_groups
            .insert(group.to_string());
        let keys = session
            .query_trigger_keys(&TriggerQuery::in_group(GroupMatcher::group_equals(group)))
            .await?;
        for key in &keys {
            self.pause_trigger_in(session, key).await?;
        }
        tracing::info!(group = %group, triggers = keys.len(), "Paused trigger group");
        Ok(())
    }

    async fn pause_job_in(
        &self,
        session: &mut Session<'_, S>,
        key: &JobKey,
    ) -> Result<(), JobStoreError> {
        let keys = session
            .query_trigger_keys(&TriggerQuery::for_job(key))
            .await?;
        for trigger in &keys {
            self.pause_trigger_in(session, trigger).await?;
        }
        Ok(())
    }

    pub(super) async fn resume_trigger_in(
        &self,
        session: &mut Session<'_, S>,
        key: &TriggerKey,
    ) -> Result<(), JobStoreError> {
        let Some(mut stored) = session.trigger(key).await? else {
            return Ok(());
        };
        let blocked = session.is_job_blocked(stored.trigger.job_key()).await?;
        let Some(next) = stored.state.resumed(blocked) else {
            return Ok(());
        };
        if !stored.transition(next) {
            return Ok(());
        }
        tracing::debug!(trigger = %key, state = %next, "Resumed trigger");
        session.put_trigger(stored.clone());

        let now = self.clock.now();
        self.apply_misfire_in(session, &mut stored, now).await?;
        session.notify(Notification::SchedulingChanged(
            stored.trigger.next_fire_time(),
        ));
        Ok(())
    }

    async fn resume_trigger_group_in(
        &self,
        session: &mut Session<'_, S>,
        group: &str,
    ) -> Result<(), JobStoreError> {
        session
            .scheduler_mut()
            .await?
            .paused_trigger_groups
            .remove(group);

        let paused_job_groups = session.scheduler().await?.paused_job_groups.clone();
        let triggers = session
            .query_triggers(&TriggerQuery::in_group(GroupMatcher::group_equals(group)))
            .await?;
        for stored in &triggers {
            if paused_job_groups.contains(stored.trigger.job_key().group()) {
                continue;
            }
            self.resume_trigger_in(session, stored.key()).await?;
        }
        tracing::info!(group = %group, "Resumed trigger group");
        Ok(())
    }

    async fn resume_job_in(
        &self,
        session: &mut Session<'_, S>,
        key: &JobKey,
    ) -> Result<(), JobStoreError> {
        let keys = session
            .query_trigger_keys(&TriggerQuery::for_job(key))
            .await?;
        for trigger in &keys {
            self.resume_trigger_in(session, trigger).await?;
        }
        Ok(())
    }
}

fn equality_group(matcher: &GroupMatcher) -> Result<String, JobStoreError> {
    matcher
        .equality_value()
        .map(str::to_string)
        .ok_or_else(|| JobStoreError::UnsupportedMatcher(matcher.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::Clock;
    use crate::core::job::Job;
    use crate::core::schedule::SimpleSchedule;
    use crate::core::state::{TriggerState, TriggerStatus};
    use crate::core::trigger::Trigger;
    use crate::storage::InMemoryStorage;
    use crate::testing::ManualClock;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 6, 0, 0).unwrap()
    }

    fn create_store() -> (JobStore<InMemoryStorage>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now()));
        let store = JobStore::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
        (store, clock)
    }

    fn trigger(name: &str, group: &str, job: &JobKey) -> Trigger {
        Trigger::new(
            TriggerKey::new(name, group),
            job.clone(),
            SimpleSchedule::repeat_forever(Duration::from_secs(60)),
        )
        .start_at(now() + TimeDelta::minutes(1))
    }

    async fn state(store: &JobStore<InMemoryStorage>, key: &TriggerKey) -> TriggerState {
        store
            .storage()
            .load_trigger(key)
            .await
            .unwrap()
            .unwrap()
            .state
    }

    #[tokio::test]
    async fn test_paused_group_applies_to_new_triggers() {
        let (store, _) = create_store();
        let job = JobKey::new("a", "jobs");
        store.store_job(Job::new(job.clone()), false).await.unwrap();

        let paused = store
            .pause_triggers(&GroupMatcher::group_equals("reports"))
            .await
            .unwrap();
        assert_eq!(paused, vec!["reports".to_string()]);
        assert!(store.is_trigger_group_paused("reports").await.unwrap());

        let t = trigger("t1", "reports", &job);
        store.store_trigger(t.clone(), false).await.unwrap();
        assert_eq!(
            store.trigger_state(t.key()).await.unwrap(),
            TriggerStatus::Paused
        );

        let other = trigger("t2", "other", &job);
        store.store_trigger(other.clone(), false).await.unwrap();
        assert_eq!(state(&store, other.key()).await, TriggerState::Waiting);
    }

    #[tokio::test]
    async fn test_paused_group_with_blocked_job() {
        let (store, _) = create_store();
        let job = JobKey::new("a", "jobs");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        let mut session = store.session();
        session.scheduler_mut().await.unwrap().block_job(job.clone());
        session.commit().await.unwrap();

        store
            .pause_triggers(&GroupMatcher::group_equals("reports"))
            .await
            .unwrap();
        let t = trigger("t1", "reports", &job);
        store.store_trigger(t.clone(), false).await.unwrap();
        assert_eq!(state(&store, t.key()).await, TriggerState::PausedAndBlocked);

        store
            .resume_triggers(&GroupMatcher::group_equals("reports"))
            .await
            .unwrap();
        assert_eq!(state(&store, t.key()).await, TriggerState::Blocked);
    }

    #[tokio::test]
    async fn test_non_equality_matcher_is_unsupported() {
        let (store, _) = create_store();
        assert!(matches!(
            store
                .pause_triggers(&GroupMatcher::group_starts_with("rep"))
                .await,
            Err(JobStoreError::UnsupportedMatcher(_))
        ));
        assert!(matches!(
            store.resume_jobs(&GroupMatcher::any_group()).await,
            Err(JobStoreError::UnsupportedMatcher(_))
        ));
    }

    #[tokio::test]
    async fn test_pause_job_group_holds_triggers_on_group_resume() {
        let (store, _) = create_store();
        let job = JobKey::new("a", "etl");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        let t = trigger("t1", "hourly", &job);
        store.store_trigger(t.clone(), false).await.unwrap();

        store
            .pause_jobs(&GroupMatcher::group_equals("etl"))
            .await
            .unwrap();
        assert_eq!(state(&store, t.key()).await, TriggerState::Paused);

        store
            .pause_triggers(&GroupMatcher::group_equals("hourly"))
            .await
            .unwrap();
        store
            .resume_triggers(&GroupMatcher::group_equals("hourly"))
            .await
            .unwrap();
        assert_eq!(state(&store, t.key()).await, TriggerState::Paused);

        store
            .resume_jobs(&GroupMatcher::group_equals("etl"))
            .await
            .unwrap();
        assert_eq!(state(&store, t.key()).await, TriggerState::Waiting);
        assert!(!store.is_job_group_paused("etl").await.unwrap());
    }

    #[tokio::test]
    async fn test_resume_applies_misfire() {
        let (store, clock) = create_store();
        let job = JobKey::new("a", "jobs");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        let t = trigger("t1", "g", &job);
        store.store_trigger(t.clone(), false).await.unwrap();
        store.pause_trigger(t.key()).await.unwrap();

        clock.advance(TimeDelta::minutes(30));
        store.resume_trigger(t.key()).await.unwrap();

        let loaded = store.retrieve_trigger(t.key()).await.unwrap().unwrap();
        assert!(loaded.next_fire_time().unwrap() > clock.now());
        assert_eq!(state(&store, t.key()).await, TriggerState::Waiting);
    }

    #[tokio::test]
    async fn test_pause_and_resume_all() {
        let (store, _) = create_store();
        let job = JobKey::new("a", "jobs");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        let t1 = trigger("t1", "g1", &job);
        let t2 = trigger("t2", "g2", &job);
        store.store_trigger(t1.clone(), false).await.unwrap();
        store.store_trigger(t2.clone(), false).await.unwrap();

        store.pause_all().await.unwrap();
        assert_eq!(state(&store, t1.key()).await, TriggerState::Paused);
        assert_eq!(state(&store, t2.key()).await, TriggerState::Paused);
        assert_eq!(store.paused_trigger_groups().await.unwrap().len(), 2);

        store.resume_all().await.unwrap();
        assert_eq!(state(&store, t1.key()).await, TriggerState::Waiting);
        assert_eq!(state(&store, t2.key()).await, TriggerState::Waiting);
        assert!(store.paused_trigger_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_trigger_is_not_paused() {
        let (store, _) = create_store();
        let job = JobKey::new("a", "jobs");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        let t = trigger("t1", "g", &job);
        store.store_trigger(t.clone(), false).await.unwrap();

        let mut session = store.session();
        let mut stored = session.trigger(t.key()).await.unwrap().unwrap();
        stored.state = TriggerState::Complete;
        session.put_trigger(stored);
        session.commit().await.unwrap();

        store.pause_trigger(t.key()).await.unwrap();
        assert_eq!(state(&store, t.key()).await, TriggerState::Complete);
    }
}
