//! Misfire detection.

use chrono::{DateTime, TimeDelta, Utc};

use super::session::{Notification, Session};
use super::{JobStore, JobStoreError};
use crate::core::state::TriggerState;
use crate::core::trigger::MisfireInstruction;
use crate::core::types::TriggerKey;
use crate::storage::{Storage, StoredTrigger};

impl<S: Storage> JobStore<S> {
    /// Apply misfire handling to a stored trigger.
    ///
    /// Returns whether the trigger's fire time changed. A trigger left with
    /// no next fire time is moved to `Complete`. A missing trigger reports
    /// no misfire.
    pub async fn apply_misfire(&self, key: &TriggerKey) -> Result<bool, JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();

        let Some(mut stored) = session.trigger(key).await? else {
            return Ok(false);
        };
        let now = self.clock.now();
        let misfired = self
            .apply_misfire_in(&mut session, &mut stored, now)
            .await?;

        self.finish(session, guard).await?;
        Ok(misfired)
    }

    /// Misfire handling against a session; writes the trigger back when it misfired.
    pub(super) async fn apply_misfire_in(
        &self,
        session: &mut Session<'_, S>,
        stored: &mut StoredTrigger,
        now: DateTime<Utc>,
    ) -> Result<bool, JobStoreError> {
        let threshold = TimeDelta::from_std(self.misfire_threshold()).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(threshold).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let Some(original) = stored.trigger.next_fire_time() else {
            return Ok(false);
        };
        if original > cutoff
            || stored.trigger.misfire_instruction() == MisfireInstruction::IgnoreMisfirePolicy
        {
            return Ok(false);
        }

        let calendar = match stored.trigger.calendar_name() {
            Some(name) => session.calendar(name).await?,
            None => None,
        };

        session.notify(Notification::Misfired(stored.trigger.clone()));
        stored.trigger.update_after_misfire(calendar.as_ref(), now);

        let next = stored.trigger.next_fire_time();
        tracing::debug!(
            trigger = %stored.key(),
            missed = %original,
            next_fire_time = ?next,
            "Trigger misfired"
        );

        if next.is_none() {
            stored.transition(TriggerState::Complete);
            session.put_trigger(stored.clone());
            session.notify(Notification::Finalized(stored.trigger.clone()));
            return Ok(true);
        }

        session.put_trigger(stored.clone());
        Ok(next != Some(original))
    }
}
