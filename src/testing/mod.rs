//! Testing utilities for users of the Cadence library.
//!
//! This module provides helpers for testing scheduling code:
//!
//! - [`ManualClock`]: A clock that only moves when told to
//! - [`RecordingSignaler`]: Captures every signal the job store sends
//! - [`RecordingExecutor`]: A job executor that records firings and can fail or stall

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::clock::Clock;
use crate::core::job::JobExecutionError;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};
use crate::events::SchedulerSignaler;
use crate::scheduler::{JobExecutionContext, JobExecutor};

/// A clock for deterministic misfire and acquisition tests.
///
/// # Example
///
/// ```
/// use cadence::testing::ManualClock;
/// use cadence::core::clock::Clock;
/// use chrono::{TimeDelta, TimeZone, Utc};
///
/// let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
/// clock.advance(TimeDelta::minutes(5));
/// assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap());
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock stopped at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// A signaler that records what the job store reported.
#[derive(Debug, Default)]
pub struct RecordingSignaler {
    misfired: Mutex<Vec<TriggerKey>>,
    finalized: Mutex<Vec<TriggerKey>>,
    jobs_deleted: Mutex<Vec<JobKey>>,
    scheduling_changes: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl RecordingSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers reported as misfired, in order.
    pub async fn misfired(&self) -> Vec<TriggerKey> {
        self.misfired.lock().await.clone()
    }

    /// Triggers reported as finalized, in order.
    pub async fn finalized(&self) -> Vec<TriggerKey> {
        self.finalized.lock().await.clone()
    }

    /// Jobs reported as deleted by cascade, in order.
    pub async fn jobs_deleted(&self) -> Vec<JobKey> {
        self.jobs_deleted.lock().await.clone()
    }

    /// Number of scheduling-change signals received.
    pub async fn scheduling_changes(&self) -> usize {
        self.scheduling_changes.lock().await.len()
    }

    /// Candidate fire times carried by scheduling-change signals.
    pub async fn scheduling_candidates(&self) -> Vec<Option<DateTime<Utc>>> {
        self.scheduling_changes.lock().await.clone()
    }
}

#[async_trait]
impl SchedulerSignaler for RecordingSignaler {
    async fn notify_trigger_listeners_misfired(&self, trigger: &Trigger) {
        self.misfired.lock().await.push(trigger.key().clone());
    }

    async fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger) {
        self.finalized.lock().await.push(trigger.key().clone());
    }

    async fn notify_scheduler_listeners_job_deleted(&self, job_key: &JobKey) {
        self.jobs_deleted.lock().await.push(job_key.clone());
    }

    async fn signal_scheduling_change(&self, candidate: Option<DateTime<Utc>>) {
        self.scheduling_changes.lock().await.push(candidate);
    }
}

/// One firing seen by a [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExecution {
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub fire_instance_id: Option<String>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub recovering: bool,
}

/// A job executor for tests.
///
/// Every execution is recorded when it finishes. Executions can be made to
/// fail with a given error or to take a fixed time.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    failure: Option<JobExecutionError>,
    delay: Option<Duration>,
    started: Mutex<usize>,
    executions: Mutex<Vec<RecordedExecution>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every execution fail with `error`.
    pub fn failing_with(mut self, error: JobExecutionError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Make every execution take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Finished executions, in completion order.
    pub async fn executions(&self) -> Vec<RecordedExecution> {
        self.executions.lock().await.clone()
    }

    /// Number of finished executions.
    pub async fn execution_count(&self) -> usize {
        self.executions.lock().await.len()
    }

    /// Number of executions that have started.
    pub async fn started_count(&self) -> usize {
        *self.started.lock().await
    }

    /// Wait until at least `count` executions finished.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.execution_count().await >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.execution_count().await >= count
    }

    /// Wait until at least `count` executions started.
    pub async fn wait_for_started(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.started_count().await >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.started_count().await >= count
    }
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    async fn execute(&self, ctx: &mut JobExecutionContext) -> Result<(), JobExecutionError> {
        *self.started.lock().await += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.executions.lock().await.push(RecordedExecution {
            trigger_key: ctx.trigger().key().clone(),
            job_key: ctx.job().key().clone(),
            fire_instance_id: ctx.fire_instance_id().map(str::to_string),
            scheduled_fire_time: ctx.scheduled_fire_time(),
            recovering: ctx.is_recovering(),
        });

        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
