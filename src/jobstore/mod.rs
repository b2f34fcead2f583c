//! The trigger scheduling core.
//!
//! [`JobStore`] owns no authoritative state: jobs, triggers and the
//! per-instance scheduler record live in a [`Storage`] backend. Every
//! mutating operation runs inside one critical section, works against a
//! session (a unit of work over the store) and commits its writes as a
//! single batch. Read-only introspection goes straight to the store.
//!
//! The operations are split by concern:
//! - `crud`: storing, retrieving, replacing and removing jobs, triggers and calendars
//! - `pause`: pause/resume of triggers, jobs and groups
//! - `misfire`: misfire detection and recomputation
//! - `acquire`: reserving due triggers
//! - `firing`: turning reserved triggers into fire bundles
//! - `completion`: reconciling execution outcomes
//! - `recovery`: startup recovery of interrupted state

mod acquire;
mod completion;
mod crud;
mod error;
mod firing;
mod misfire;
mod pause;
mod recovery;
mod session;

pub use acquire::DuePool;
pub use error::JobStoreError;
pub use firing::TriggerFiredBundle;
pub use recovery::RecoveryReport;

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use crate::core::clock::{Clock, SystemClock};
use crate::events::{EventBus, SchedulerSignaler};
use crate::storage::Storage;
use session::{Notification, Session};

/// Default misfire threshold.
pub const DEFAULT_MISFIRE_THRESHOLD: Duration = Duration::from_secs(5);

/// Default scheduler instance name.
pub const DEFAULT_INSTANCE_NAME: &str = "cadence";

/// Trigger group of one-shot triggers created to re-run interrupted jobs.
pub const RECOVERING_JOBS_GROUP: &str = "RECOVERING_JOBS";

/// Source of unique fire instance ids.
///
/// Ids increase monotonically for the lifetime of the counter. Each store
/// gets its own counter unless one is shared explicitly.
#[derive(Debug)]
pub struct FireInstanceCounter {
    next: AtomicU64,
}

impl FireInstanceCounter {
    /// Start counting at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Next id.
    pub fn next_id(&self) -> String {
        self.next.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

impl Default for FireInstanceCounter {
    /// Seeded from the current time so ids stay unique across restarts.
    fn default() -> Self {
        let seed = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        Self::starting_at(seed)
    }
}

/// Persistent trigger store.
pub struct JobStore<S: Storage> {
    storage: Arc<S>,
    signaler: Arc<dyn SchedulerSignaler>,
    clock: Arc<dyn Clock>,
    instance_name: String,
    misfire_threshold_ms: AtomicU64,
    fire_instance_counter: Arc<FireInstanceCounter>,
    /// Serializes every mutating operation.
    lock: Mutex<()>,
}

impl<S: Storage> JobStore<S> {
    /// Create a job store over the given storage backend.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            signaler: Arc::new(EventBus::new()),
            clock: Arc::new(SystemClock),
            instance_name: DEFAULT_INSTANCE_NAME.to_string(),
            misfire_threshold_ms: AtomicU64::new(duration_millis(DEFAULT_MISFIRE_THRESHOLD)),
            fire_instance_counter: Arc::new(FireInstanceCounter::default()),
            lock: Mutex::new(()),
        }
    }

    /// Set the host signaler.
    pub fn with_signaler(mut self, signaler: Arc<dyn SchedulerSignaler>) -> Self {
        self.signaler = signaler;
        self
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the scheduler instance name the scheduler record is kept under.
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Set the misfire threshold.
    pub fn with_misfire_threshold(self, threshold: Duration) -> Result<Self, JobStoreError> {
        self.set_misfire_threshold(threshold)?;
        Ok(self)
    }

    /// Share a fire instance counter.
    pub fn with_fire_instance_counter(mut self, counter: Arc<FireInstanceCounter>) -> Self {
        self.fire_instance_counter = counter;
        self
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Get the time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// How late a fire time may be before it counts as misfired.
    pub fn misfire_threshold(&self) -> Duration {
        Duration::from_millis(self.misfire_threshold_ms.load(Ordering::SeqCst))
    }

    /// Set the misfire threshold; it must be at least one millisecond.
    pub fn set_misfire_threshold(&self, threshold: Duration) -> Result<(), JobStoreError> {
        let millis = duration_millis(threshold);
        if millis == 0 {
            return Err(JobStoreError::Configuration(format!(
                "misfire threshold must be positive, got {:?}",
                threshold
            )));
        }
        self.misfire_threshold_ms.store(millis, Ordering::SeqCst);
        Ok(())
    }

    /// Load the scheduler record, creating it on first use.
    pub async fn initialize(&self) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        if self
            .storage
            .load_scheduler(&self.instance_name)
            .await?
            .is_none()
        {
            session.scheduler_mut().await?;
            tracing::info!(instance = %self.instance_name, "Created scheduler record");
        }
        self.finish(session, guard).await
    }

    /// Mark the scheduler paused.
    pub async fn scheduler_paused(&self) -> Result<(), JobStoreError> {
        self.set_scheduler_state("Paused").await
    }

    /// Mark the scheduler resumed.
    pub async fn scheduler_resumed(&self) -> Result<(), JobStoreError> {
        self.set_scheduler_state("Resumed").await
    }

    /// Mark the scheduler shut down.
    pub async fn shutdown(&self) -> Result<(), JobStoreError> {
        self.set_scheduler_state("Shutdown").await
    }

    /// The scheduler run state recorded in the store.
    pub async fn scheduler_state(&self) -> Result<String, JobStoreError> {
        Ok(self
            .storage
            .load_scheduler(&self.instance_name)
            .await?
            .map(|r| r.state)
            .unwrap_or_else(|| "Initialized".to_string()))
    }

    async fn set_scheduler_state(&self, state: &str) -> Result<(), JobStoreError> {
        let guard = self.lock.lock().await;
        let mut session = self.session();
        session.scheduler_mut().await?.state = state.to_string();
        tracing::info!(instance = %self.instance_name, state, "Scheduler state changed");
        self.finish(session, guard).await
    }

    fn session(&self) -> Session<'_, S> {
        Session::new(&self.storage, &self.instance_name)
    }

    /// Commit the session, leave the critical section, then notify the host.
    async fn finish(
        &self,
        session: Session<'_, S>,
        guard: MutexGuard<'_, ()>,
    ) -> Result<(), JobStoreError> {
        let notifications = session.commit().await?;
        drop(guard);
        self.dispatch(notifications).await;
        Ok(())
    }

    async fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            match notification {
                Notification::Misfired(trigger) => {
                    self.signaler
                        .notify_trigger_listeners_misfired(&trigger)
                        .await
                }
                Notification::Finalized(trigger) => {
                    self.signaler
                        .notify_scheduler_listeners_finalized(&trigger)
                        .await
                }
                Notification::JobDeleted(job_key) => {
                    self.signaler
                        .notify_scheduler_listeners_job_deleted(&job_key)
                        .await
                }
                Notification::SchedulingChanged(candidate) => {
                    self.signaler.signal_scheduling_change(candidate).await
                }
            }
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn create_store() -> JobStore<InMemoryStorage> {
        JobStore::new(Arc::new(InMemoryStorage::new()))
    }

    #[test]
    fn test_fire_instance_ids_increase() {
        let counter = FireInstanceCounter::starting_at(41);
        assert_eq!(counter.next_id(), "41");
        assert_eq!(counter.next_id(), "42");
    }

    #[test]
    fn test_misfire_threshold_must_be_positive() {
        let store = create_store();
        assert_eq!(store.misfire_threshold(), DEFAULT_MISFIRE_THRESHOLD);
        assert!(matches!(
            store.set_misfire_threshold(Duration::ZERO),
            Err(JobStoreError::Configuration(_))
        ));
        assert!(matches!(
            store.set_misfire_threshold(Duration::from_micros(500)),
            Err(JobStoreError::Configuration(_))
        ));
        store
            .set_misfire_threshold(Duration::from_millis(1500))
            .unwrap();
        assert_eq!(store.misfire_threshold(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_lifecycle_states_are_recorded() {
        let store = create_store().with_instance_name("node-a");
        assert_eq!(store.scheduler_state().await.unwrap(), "Initialized");

        store.initialize().await.unwrap();
        assert!(
            store
                .storage()
                .load_scheduler("node-a")
                .await
                .unwrap()
                .is_some()
        );

        store.scheduler_paused().await.unwrap();
        assert_eq!(store.scheduler_state().await.unwrap(), "Paused");
        store.scheduler_resumed().await.unwrap();
        assert_eq!(store.scheduler_state().await.unwrap(), "Resumed");
        store.shutdown().await.unwrap();
        assert_eq!(store.scheduler_state().await.unwrap(), "Shutdown");
    }
}
