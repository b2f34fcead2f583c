//! Startup recovery.
//!
//! A scheduler that stopped uncleanly leaves reservations and blocks in the
//! store. [`JobStore::scheduler_started`] clears them before the first
//! acquisition.

use super::session::Session;
use super::{JobStore, JobStoreError, RECOVERING_JOBS_GROUP};
use crate::core::schedule::SimpleSchedule;
use crate::core::state::TriggerState;
use crate::core::trigger::{MisfireInstruction, Trigger};
use crate::core::types::{JobKey, TriggerKey};
use crate::storage::{Storage, TriggerQuery};

/// What startup recovery changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Acquired triggers returned to waiting.
    pub released_acquired: usize,
    /// Blocked or paused-and-blocked triggers released.
    pub unblocked: usize,
    /// One-shot triggers created to re-run interrupted jobs.
    pub recovery_triggers: Vec<TriggerKey>,
    /// Waiting triggers whose missed fire time was handled.
    pub misfired: usize,
    /// Completed triggers deleted.
    pub removed_complete: usize,
}

impl<S: Storage> JobStore<S> {
    /// Mark the scheduler started and recover interrupted state.
    pub async fn scheduler_started(&self) -> Result<RecoveryReport, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        let mut report = RecoveryReport::default();

        session.scheduler_mut().await?.state = "Started".to_string();

        for key in self
            .trigger_keys_in_states(&mut session, [TriggerState::Acquired])
            .await?
        {
            if let Some(mut stored) = session.trigger(&key).await?
                && stored.transition(TriggerState::Waiting)
            {
                session.put_trigger(stored);
                report.released_acquired += 1;
            }
        }

        for key in self
            .trigger_keys_in_states(
                &mut session,
                [TriggerState::Blocked, TriggerState::PausedAndBlocked],
            )
            .await?
        {
            if let Some(mut stored) = session.trigger(&key).await?
                && let Some(next) = stored.state.unblocked()
            {
                stored.transition(next);
                session.put_trigger(stored);
                report.unblocked += 1;
            }
        }

        let blocked_jobs = std::mem::take(&mut session.scheduler_mut().await?.blocked_jobs);
        for job_key in &blocked_jobs {
            if let Some(key) = self.schedule_recovery_in(&mut session, job_key).await? {
                report.recovery_triggers.push(key);
            }
        }

        let now = self.clock.now();
        let waiting = session
            .query_triggers(&TriggerQuery::new().with_states([TriggerState::Waiting]))
            .await?;
        for mut stored in waiting {
            if self.apply_misfire_in(&mut session, &mut stored, now).await? {
                report.misfired += 1;
            }
        }

        for key in self
            .trigger_keys_in_states(&mut session, [TriggerState::Complete])
            .await?
        {
            if self.remove_trigger_in(&mut session, &key, true).await? {
                report.removed_complete += 1;
            }
        }

        tracing::info!(
            instance = %self.instance_name,
            released_acquired = report.released_acquired,
            unblocked = report.unblocked,
            recovery_triggers = report.recovery_triggers.len(),
            misfired = report.misfired,
            removed_complete = report.removed_complete,
            "Scheduler started"
        );
        self.finish(session, guard).await?;
        Ok(report)
    }

    /// Schedule a one-shot re-run of a job that asked for recovery.
    async fn schedule_recovery_in(
        &self,
        session: &mut Session<'_, S>,
        job_key: &JobKey,
    ) -> Result<Option<TriggerKey>, JobStoreError> {
        let Some(job) = session.job(job_key).await? else {
            return Ok(None);
        };
        if !job.requests_recovery() {
            return Ok(None);
        }

        let key = TriggerKey::new(self.fire_instance_counter.next_id(), RECOVERING_JOBS_GROUP);
        let trigger = Trigger::new(key.clone(), job_key.clone(), SimpleSchedule::once())
            .start_at(self.clock.now())
            .with_misfire_instruction(MisfireInstruction::IgnoreMisfirePolicy);
        self.store_trigger_in(session, trigger, false).await?;
        tracing::info!(job = %job_key, trigger = %key, "Scheduled recovery of interrupted job");
        Ok(Some(key))
    }
}
