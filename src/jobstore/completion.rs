//! Reconciling execution outcomes.

use super::session::{Notification, Session};
use super::{JobStore, JobStoreError};
use crate::core::job::Job;
use crate::core::state::TriggerState;
use crate::core::trigger::{CompletedExecutionInstruction, Trigger};
use crate::core::types::JobKey;
use crate::storage::{Storage, TriggerQuery};

impl<S: Storage> JobStore<S> {
    /// Record that the execution started by `trigger` finished.
    ///
    /// Either the trigger or the job may have been deleted while the job
    /// ran; cleanup still happens for whatever is left.
    pub async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &Job,
        instruction: CompletedExecutionInstruction,
    ) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        let job_key = job.key();

        if let Some(mut stored_job) = session.job(job_key).await? {
            if stored_job.is_persist_job_data_after_execution() {
                stored_job.set_job_data(job.job_data().clone());
                session.put_job(stored_job);
            }
        }

        if job.is_concurrent_execution_disallowed() {
            self.unblock_job_in(&mut session, job_key).await?;
        }

        if session.trigger(trigger.key()).await?.is_some() {
            self.apply_instruction_in(&mut session, trigger, instruction)
                .await?;
        }

        tracing::debug!(
            trigger = %trigger.key(),
            job = %job_key,
            instruction = ?instruction,
            "Job execution complete"
        );
        self.finish(session, guard).await
    }

    /// Release the siblings held back by a non-concurrent execution.
    async fn unblock_job_in(
        &self,
        session: &mut Session<'_, S>,
        job_key: &JobKey,
    ) -> Result<(), JobStoreError> {
        session.scheduler_mut().await?.unblock_job(job_key);

        let siblings = session
            .query_triggers(
                &TriggerQuery::for_job(job_key)
                    .with_states([TriggerState::Blocked, TriggerState::PausedAndBlocked]),
            )
            .await?;
        for mut sibling in siblings {
            if let Some(next) = sibling.state.unblocked() {
                sibling.transition(next);
                session.put_trigger(sibling);
            }
        }
        tracing::debug!(job = %job_key, "Unblocked non-concurrent job");
        session.notify(Notification::SchedulingChanged(None));
        Ok(())
    }

    async fn apply_instruction_in(
        &self,
        session: &mut Session<'_, S>,
        trigger: &Trigger,
        instruction: CompletedExecutionInstruction,
    ) -> Result<(), JobStoreError> {
        let key = trigger.key();
        match instruction {
            CompletedExecutionInstruction::NoInstruction => return Ok(()),
            CompletedExecutionInstruction::DeleteTrigger => {
                if trigger.next_fire_time().is_none() {
                    // Rescheduled while the job ran.
                    let rescheduled = session
                        .trigger(key)
                        .await?
                        .is_some_and(|stored| stored.trigger.next_fire_time().is_some());
                    if rescheduled {
                        tracing::debug!(trigger = %key, "Keeping trigger rescheduled during execution");
                        return Ok(());
                    }
                }
                self.remove_trigger_in(session, key, true).await?;
            }
            CompletedExecutionInstruction::SetTriggerComplete => {
                self.set_trigger_state_in(session, trigger, TriggerState::Complete)
                    .await?;
                session.notify(Notification::Finalized(trigger.clone()));
            }
            CompletedExecutionInstruction::SetTriggerError => {
                tracing::warn!(trigger = %key, "Trigger set to error state");
                self.set_trigger_state_in(session, trigger, TriggerState::Error)
                    .await?;
            }
            CompletedExecutionInstruction::SetAllJobTriggersComplete => {
                self.set_job_triggers_state_in(session, trigger.job_key(), TriggerState::Complete)
                    .await?;
                session.notify(Notification::Finalized(trigger.clone()));
            }
            CompletedExecutionInstruction::SetAllJobTriggersError => {
                tracing::warn!(job = %trigger.job_key(), "All triggers of job set to error state");
                self.set_job_triggers_state_in(session, trigger.job_key(), TriggerState::Error)
                    .await?;
            }
        }
        session.notify(Notification::SchedulingChanged(None));
        Ok(())
    }

    async fn set_trigger_state_in(
        &self,
        session: &mut Session<'_, S>,
        trigger: &Trigger,
        state: TriggerState,
    ) -> Result<(), JobStoreError> {
        if let Some(mut stored) = session.trigger(trigger.key()).await? {
            if stored.transition(state) {
                session.put_trigger(stored);
            }
        }
        Ok(())
    }

    async fn set_job_triggers_state_in(
        &self,
        session: &mut Session<'_, S>,
        job_key: &JobKey,
        state: TriggerState,
    ) -> Result<(), JobStoreError> {
        let triggers = session
            .query_triggers(&TriggerQuery::for_job(job_key))
            .await?;
        for mut stored in triggers {
            if stored.transition(state) {
                session.put_trigger(stored);
            }
        }
        Ok(())
    }
}
