//! Turning acquired triggers into fire bundles.

use chrono::{DateTime, Utc};

use super::session::Session;
use super::{JobStore, JobStoreError, RECOVERING_JOBS_GROUP};
use crate::core::calendar::Calendar;
use crate::core::job::Job;
use crate::core::state::TriggerState;
use crate::core::trigger::Trigger;
use crate::core::types::JobKey;
use crate::storage::{Storage, TriggerQuery};

/// Everything the executor needs for one firing.
#[derive(Debug, Clone)]
pub struct TriggerFiredBundle {
    pub job: Job,
    /// The trigger as advanced by this firing.
    pub trigger: Trigger,
    pub calendar: Option<Calendar>,
    /// Whether this firing re-runs an interrupted execution.
    pub recovering: bool,
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    /// Previous fire time before this firing.
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
}

impl<S: Storage> JobStore<S> {
    /// Fire acquired triggers.
    ///
    /// Triggers no longer `Acquired`, bound to a missing calendar or
    /// referencing a missing job are dropped. A trigger of a non-concurrent
    /// job that is already executing moves to `Blocked` instead of firing.
    /// All updates commit together.
    pub async fn triggers_fired(
        &self,
        triggers: &[Trigger],
    ) -> Result<Vec<TriggerFiredBundle>, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        let now = self.clock.now();

        let mut bundles = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            if let Some(bundle) = self.trigger_fired_in(&mut session, trigger, now).await? {
                bundles.push(bundle);
            }
        }

        self.finish(session, guard).await?;
        Ok(bundles)
    }

    async fn trigger_fired_in(
        &self,
        session: &mut Session<'_, S>,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<Option<TriggerFiredBundle>, JobStoreError> {
        let key = trigger.key();
        let Some(mut stored) = session.trigger(key).await? else {
            tracing::debug!(trigger = %key, "Dropping fired trigger that no longer exists");
            return Ok(None);
        };
        if stored.state != TriggerState::Acquired {
            tracing::debug!(
                trigger = %key,
                state = %stored.state,
                "Dropping fired trigger that is no longer acquired"
            );
            return Ok(None);
        }

        let calendar = match stored.trigger.calendar_name() {
            Some(name) => match session.calendar(name).await? {
                Some(calendar) => Some(calendar),
                None => {
                    tracing::warn!(
                        trigger = %key,
                        calendar = name,
                        "Dropping fired trigger bound to a missing calendar"
                    );
                    return Ok(None);
                }
            },
            None => None,
        };

        let job_key = stored.trigger.job_key().clone();
        let Some(job) = session.job(&job_key).await? else {
            tracing::warn!(
                trigger = %key,
                job = %job_key,
                "Fired trigger references a missing job"
            );
            stored.transition(TriggerState::Error);
            session.put_trigger(stored);
            return Ok(None);
        };

        if job.is_concurrent_execution_disallowed() && session.is_job_blocked(&job_key).await? {
            tracing::debug!(
                trigger = %key,
                job = %job_key,
                "Holding back fired trigger of a running non-concurrent job"
            );
            stored.transition(TriggerState::Blocked);
            session.put_trigger(stored);
            return Ok(None);
        }

        let previous_fire_time = stored.trigger.previous_fire_time();
        stored.trigger.triggered(calendar.as_ref());

        let next_state = if job.is_concurrent_execution_disallowed() {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        };
        stored.transition(next_state);

        let bundle = TriggerFiredBundle {
            recovering: key.group() == RECOVERING_JOBS_GROUP,
            fire_time: now,
            scheduled_fire_time: stored.trigger.previous_fire_time(),
            previous_fire_time,
            next_fire_time: stored.trigger.next_fire_time(),
            trigger: stored.trigger.clone(),
            calendar,
            job,
        };

        tracing::debug!(
            trigger = %key,
            job = %job_key,
            scheduled = ?bundle.scheduled_fire_time,
            next_fire_time = ?bundle.next_fire_time,
            "Trigger fired"
        );
        session.put_trigger(stored);

        if bundle.job.is_concurrent_execution_disallowed() {
            self.block_job_in(session, &job_key).await?;
        }
        Ok(Some(bundle))
    }

    /// Hold back every other trigger of a job whose non-concurrent
    /// execution is starting.
    async fn block_job_in(
        &self,
        session: &mut Session<'_, S>,
        job_key: &JobKey,
    ) -> Result<(), JobStoreError> {
        let siblings = session
            .query_triggers(
                &TriggerQuery::for_job(job_key)
                    .with_states([TriggerState::Waiting, TriggerState::Paused]),
            )
            .await?;
        for mut sibling in siblings {
            if let Some(next) = sibling.state.blocked() {
                sibling.transition(next);
                session.put_trigger(sibling);
            }
        }
        session.scheduler_mut().await?.block_job(job_key.clone());
        tracing::debug!(job = %job_key, "Blocked non-concurrent job");
        Ok(())
    }
}
