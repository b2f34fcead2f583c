//! Reserving due triggers.
//!
//! Each pass loads the `Waiting` triggers due within the window into a
//! [`DuePool`] ordered by fire time, then priority, then key, and takes
//! candidates from the front. The pool lives only for the pass; the store
//! stays the source of truth.

use chrono::{DateTime, TimeDelta, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use super::session::Session;
use super::{JobStore, JobStoreError};
use crate::core::state::TriggerState;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};
use crate::storage::{Storage, StoredTrigger, TriggerQuery};

type DueKey = (DateTime<Utc>, Reverse<i32>, TriggerKey);

/// Triggers ordered by next fire time ascending, then priority descending.
///
/// Triggers without a next fire time are never admitted.
#[derive(Debug, Default)]
pub struct DuePool {
    entries: BTreeMap<DueKey, StoredTrigger>,
}

impl DuePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trigger; returns `false` if it has no next fire time.
    pub fn push(&mut self, stored: StoredTrigger) -> bool {
        let Some(next) = stored.trigger.next_fire_time() else {
            return false;
        };
        let key = (
            next,
            Reverse(stored.trigger.priority()),
            stored.key().clone(),
        );
        self.entries.insert(key, stored);
        true
    }

    /// Remove and return the first trigger in fire order.
    pub fn pop_first(&mut self) -> Option<StoredTrigger> {
        self.entries.pop_first().map(|(_, stored)| stored)
    }

    /// Fire time of the first trigger.
    pub fn peek_fire_time(&self) -> Option<DateTime<Utc>> {
        self.entries.first_key_value().map(|((next, _, _), _)| *next)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<StoredTrigger> for DuePool {
    fn from_iter<I: IntoIterator<Item = StoredTrigger>>(iter: I) -> Self {
        let mut pool = DuePool::new();
        for stored in iter {
            pool.push(stored);
        }
        pool
    }
}

impl<S: Storage> JobStore<S> {
    /// Reserve up to `max_count` triggers due no later than
    /// `not_later_than + time_window`, in fire time then priority order.
    ///
    /// Reserved triggers move to `Acquired` and carry a fresh fire instance
    /// id. Stale triggers pass through misfire handling once per pass. A
    /// non-concurrent job gets at most one reservation, and none while it is
    /// blocked or already has a trigger `Acquired`; its other triggers stay
    /// `Waiting`.
    pub async fn acquire_next_triggers(
        &self,
        not_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Result<Vec<Trigger>, JobStoreError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let window = TimeDelta::from_std(time_window).unwrap_or(TimeDelta::MAX);
        let horizon = not_later_than
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let guard = self.lock.lock().await;
        let mut session = self.session();
        let now = self.clock.now();

        let candidates = session
            .query_triggers(
                &TriggerQuery::new()
                    .with_states([TriggerState::Waiting])
                    .due_not_after(horizon),
            )
            .await?;
        let mut pool: DuePool = candidates.into_iter().collect();

        let mut acquired = Vec::new();
        let mut misfire_checked: HashSet<TriggerKey> = HashSet::new();
        let mut acquired_jobs: HashSet<JobKey> = HashSet::new();
        let mut excluded: Vec<TriggerKey> = Vec::new();

        while acquired.len() < max_count {
            let Some(mut stored) = pool.pop_first() else {
                break;
            };

            if misfire_checked.insert(stored.key().clone())
                && self
                    .apply_misfire_in(&mut session, &mut stored, now)
                    .await?
            {
                if stored.state == TriggerState::Waiting {
                    pool.push(stored);
                }
                continue;
            }

            let Some(next) = stored.trigger.next_fire_time() else {
                continue;
            };
            if next > horizon {
                break;
            }

            let job_key = stored.trigger.job_key().clone();
            let disallows_concurrency = session
                .job(&job_key)
                .await?
                .is_some_and(|job| job.is_concurrent_execution_disallowed());
            if disallows_concurrency {
                if acquired_jobs.contains(&job_key)
                    || self.job_in_flight_in(&mut session, &job_key).await?
                {
                    acquired_jobs.insert(job_key);
                    excluded.push(stored.key().clone());
                    continue;
                }
                acquired_jobs.insert(job_key);
            }

            if !stored.transition(TriggerState::Acquired) {
                continue;
            }
            stored
                .trigger
                .set_fire_instance_id(self.fire_instance_counter.next_id());
            tracing::debug!(
                trigger = %stored.key(),
                next_fire_time = %next,
                priority = stored.trigger.priority(),
                "Acquired trigger"
            );
            acquired.push(stored.trigger.clone());
            session.put_trigger(stored);
        }

        if !excluded.is_empty() {
            tracing::debug!(
                excluded = ?excluded,
                "Left triggers of non-concurrent jobs waiting"
            );
        }

        self.finish(session, guard).await?;
        Ok(acquired)
    }

    /// Whether a non-concurrent job is executing or has a reserved trigger.
    async fn job_in_flight_in(
        &self,
        session: &mut Session<'_, S>,
        job_key: &JobKey,
    ) -> Result<bool, JobStoreError> {
        if session.is_job_blocked(job_key).await? {
            return Ok(true);
        }
        let reserved = session
            .query_triggers(
                &TriggerQuery::for_job(job_key).with_states([TriggerState::Acquired]),
            )
            .await?;
        Ok(!reserved.is_empty())
    }

    /// Return an `Acquired` trigger to `Waiting` without firing it.
    pub async fn release_acquired_trigger(&self, key: &TriggerKey) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();

        if let Some(mut stored) = session.trigger(key).await? {
            if stored.state == TriggerState::Acquired && stored.transition(TriggerState::Waiting) {
                tracing::debug!(trigger = %key, "Released acquired trigger");
                session.put_trigger(stored);
            }
        }

        self.finish(session, guard).await
    }
}
