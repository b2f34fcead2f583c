//! Scheduler engine implementation.
//!
//! The scheduler drives the job store's firing lifecycle:
//! - Acquiring due triggers in batches
//! - Waiting for their fire time, then firing them
//! - Running each fire bundle on the executor
//! - Reporting completion back to the store
//! - Manual job triggers, pause and resume
//! - Startup recovery and graceful shutdown

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::job::JobDataMap;
use crate::core::schedule::SimpleSchedule;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};
use crate::events::{Event, EventBus};
use crate::jobstore::{JobStore, RecoveryReport, TriggerFiredBundle};
use crate::storage::Storage;

use super::executor::{CommandExecutor, JobExecutionContext, JobExecutor};
use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::handlers::SchedulingWakeup;
use super::types::{SchedulerCommand, SchedulerError, SchedulerState};

/// Trigger group of one-shot triggers created by manual job triggers.
pub const MANUAL_TRIGGER_GROUP: &str = "MANUAL_TRIGGER";

/// Default wait between acquisition passes when nothing is due.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(1);

/// Running executions keyed by fire instance id.
type RunningJobs = Arc<RwLock<HashMap<String, (TriggerKey, JoinHandle<()>)>>>;

/// Main scheduler driving a [`JobStore`].
pub struct Scheduler<S: Storage> {
    /// The scheduling core.
    store: Arc<JobStore<S>>,
    /// Event bus the store signals through.
    event_bus: Arc<EventBus>,
    /// Runs fired jobs.
    executor: Arc<dyn JobExecutor>,
    /// Wait between acquisition passes when nothing is due.
    idle_wait: Duration,
    /// Maximum triggers acquired per pass.
    batch_size: usize,
    /// How far past the look-ahead a trigger may be and still join a batch.
    time_window: Duration,
    /// Maximum concurrent executions overall (None = unlimited).
    max_concurrent_jobs: Option<usize>,
    running_jobs: RunningJobs,
    /// Graceful shutdown timeout (default: 30 seconds).
    shutdown_timeout: Duration,
    wakeup: Arc<Notify>,
}

impl<S: Storage + 'static> Scheduler<S> {
    /// Create a scheduler over a job store, signaling through a new event bus.
    pub fn new(store: JobStore<S>) -> Self {
        Self::with_event_bus(store, Arc::new(EventBus::new()))
    }

    /// Create a scheduler whose store signals through the given event bus.
    pub fn with_event_bus(store: JobStore<S>, event_bus: Arc<EventBus>) -> Self {
        let store = store.with_signaler(event_bus.clone());
        Self {
            store: Arc::new(store),
            event_bus,
            executor: Arc::new(CommandExecutor::new()),
            idle_wait: DEFAULT_IDLE_WAIT,
            batch_size: 1,
            time_window: Duration::ZERO,
            max_concurrent_jobs: None,
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
            shutdown_timeout: Duration::from_secs(30),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Set the job executor.
    pub fn with_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Set the idle wait.
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// Set the maximum number of triggers acquired per pass.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the acquisition time window.
    pub fn with_time_window(mut self, time_window: Duration) -> Self {
        self.time_window = time_window;
        self
    }

    /// Set the maximum concurrent jobs.
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = Some(max);
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Get the job store.
    pub fn store(&self) -> &Arc<JobStore<S>> {
        &self.store
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Recover interrupted state and start the scheduling loop.
    pub async fn start(
        self,
    ) -> Result<(SchedulerHandle, JoinHandle<()>, RecoveryReport), SchedulerError> {
        self.store.initialize().await?;
        let report = self.store.scheduler_started().await?;

        self.event_bus
            .register(Arc::new(SchedulingWakeup {
                notify: Arc::clone(&self.wakeup),
            }))
            .await;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        Ok((handle, scheduler_task, report))
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        tracing::info!(
            instance = %self.store.instance_name(),
            batch_size = self.batch_size,
            idle_wait = ?self.idle_wait,
            "Scheduler running"
        );
        // Acquired triggers waiting for their fire time.
        let mut pending: Vec<Trigger> = Vec::new();
        let mut next_wake = Instant::now();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_wake) => {
                    self.cleanup_finished_jobs().await;
                    let current_state = *state.read().await;
                    next_wake = if current_state == SchedulerState::Running {
                        self.run_pass(&mut pending).await
                    } else {
                        Instant::now() + self.idle_wait
                    };
                }
                _ = self.wakeup.notified() => {
                    // A newly scheduled trigger may be due before the held batch.
                    self.release_pending(&mut pending).await;
                    next_wake = Instant::now();
                }
                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::TriggerJob { job_key, data, response } => {
                            let result = self.trigger_job(job_key, data).await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Pause { response } => {
                            *state.write().await = SchedulerState::Paused;
                            self.release_pending(&mut pending).await;
                            if let Err(e) = self.store.scheduler_paused().await {
                                tracing::warn!(error = %e, "Failed to record scheduler pause");
                            }
                            tracing::info!("Scheduler paused");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Resume { response } => {
                            *state.write().await = SchedulerState::Running;
                            if let Err(e) = self.store.scheduler_resumed().await {
                                tracing::warn!(error = %e, "Failed to record scheduler resume");
                            }
                            // Triggers that fell behind during the pause go through misfire handling.
                            next_wake = Instant::now();
                            tracing::info!("Scheduler resumed");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Stopped;
                            drop(s); // Release the lock before waiting
                            self.release_pending(&mut pending).await;
                            // Wait for running jobs to complete with timeout
                            self.await_running_jobs().await;
                            if let Err(e) = self.store.shutdown().await {
                                tracing::warn!(error = %e, "Failed to record scheduler shutdown");
                            }
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One scheduling pass. Returns when the loop should wake next.
    async fn run_pass(&self, pending: &mut Vec<Trigger>) -> Instant {
        let now = self.store.clock().now();

        if !pending.is_empty() {
            if earliest_fire_time(pending).is_some_and(|t| t > now) {
                return instant_at(earliest_fire_time(pending), now);
            }
            let batch = std::mem::take(pending);
            self.fire(batch).await;
            return Instant::now();
        }

        let available = self.available_slots().await;
        if available == 0 {
            return Instant::now() + self.idle_wait;
        }

        let look_ahead = chrono::TimeDelta::from_std(self.idle_wait).unwrap_or(chrono::TimeDelta::MAX);
        let not_later_than = now.checked_add_signed(look_ahead).unwrap_or(now);
        let acquired = match self
            .store
            .acquire_next_triggers(not_later_than, available, self.time_window)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire triggers");
                return Instant::now() + self.idle_wait;
            }
        };
        if acquired.is_empty() {
            return Instant::now() + self.idle_wait;
        }

        tracing::debug!(count = acquired.len(), "Acquired trigger batch");
        let fire_at = earliest_fire_time(&acquired);
        if fire_at.is_some_and(|t| t > now) {
            *pending = acquired;
            return instant_at(fire_at, now);
        }
        self.fire(acquired).await;
        Instant::now()
    }

    /// Fire a batch and hand each bundle to the executor.
    async fn fire(&self, triggers: Vec<Trigger>) {
        let bundles = match self.store.triggers_fired(&triggers).await {
            Ok(bundles) => bundles,
            Err(e) => {
                tracing::warn!(error = %e, count = triggers.len(), "Failed to fire triggers");
                for trigger in &triggers {
                    if let Err(e) = self.store.release_acquired_trigger(trigger.key()).await {
                        tracing::warn!(trigger = %trigger.key(), error = %e, "Failed to release trigger");
                    }
                }
                return;
            }
        };

        for bundle in bundles {
            self.spawn_execution(bundle).await;
        }
    }

    async fn spawn_execution(&self, bundle: TriggerFiredBundle) {
        let trigger_key = bundle.trigger.key().clone();
        let fire_id = bundle
            .trigger
            .fire_instance_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        tracing::info!(
            trigger = %trigger_key,
            job = %bundle.job.key(),
            fire_instance_id = %fire_id,
            recovering = bundle.recovering,
            "Executing job"
        );
        self.event_bus
            .emit(Event::trigger_fired(&bundle.trigger, bundle.scheduled_fire_time))
            .await;

        let store = Arc::clone(&self.store);
        let event_bus = Arc::clone(&self.event_bus);
        let executor = Arc::clone(&self.executor);
        let running_jobs = Arc::clone(&self.running_jobs);
        let fire_id_clone = fire_id.clone();

        let handle = tokio::spawn(async move {
            let start = std::time::Instant::now();
            let mut ctx = JobExecutionContext::new(bundle);
            let result = executor.execute(&mut ctx).await;
            let duration = start.elapsed();

            let instruction = ctx.trigger().execution_complete(result.as_ref().err());
            if let Err(e) = &result {
                tracing::warn!(
                    trigger = %ctx.trigger().key(),
                    job = %ctx.job().key(),
                    error = %e,
                    "Job execution failed"
                );
            }

            if let Err(e) = store
                .triggered_job_complete(ctx.trigger(), ctx.job(), instruction)
                .await
            {
                tracing::warn!(
                    trigger = %ctx.trigger().key(),
                    error = %e,
                    "Failed to record job completion"
                );
            }

            event_bus
                .emit(Event::job_completed(
                    ctx.trigger().key().clone(),
                    ctx.job().key().clone(),
                    result.is_ok(),
                    instruction,
                    duration,
                ))
                .await;

            running_jobs.write().await.remove(&fire_id_clone);
        });

        self.running_jobs
            .write()
            .await
            .insert(fire_id, (trigger_key, handle));
    }

    /// Give held triggers back to the store.
    async fn release_pending(&self, pending: &mut Vec<Trigger>) {
        for trigger in pending.drain(..) {
            if let Err(e) = self.store.release_acquired_trigger(trigger.key()).await {
                tracing::warn!(trigger = %trigger.key(), error = %e, "Failed to release trigger");
            }
        }
    }

    /// Store a one-shot trigger that fires the job now.
    async fn trigger_job(
        &self,
        job_key: JobKey,
        data: JobDataMap,
    ) -> Result<TriggerKey, SchedulerError> {
        if !self.store.check_job_exists(&job_key).await? {
            return Err(SchedulerError::JobNotFound(job_key.to_string()));
        }

        let key = TriggerKey::new(Uuid::new_v4().to_string(), MANUAL_TRIGGER_GROUP);
        let trigger = Trigger::new(key.clone(), job_key.clone(), SimpleSchedule::once())
            .start_at(self.store.clock().now())
            .with_job_data(data);
        self.store.store_trigger(trigger, false).await?;
        tracing::info!(job = %job_key, trigger = %key, "Triggered job manually");
        Ok(key)
    }

    async fn available_slots(&self) -> usize {
        match self.max_concurrent_jobs {
            Some(max) => {
                let running = self.running_jobs.read().await.len();
                max.saturating_sub(running).min(self.batch_size)
            }
            None => self.batch_size,
        }
    }

    /// Clean up finished job handles.
    async fn cleanup_finished_jobs(&self) {
        let mut running = self.running_jobs.write().await;
        running.retain(|_, (_, handle)| !handle.is_finished());
    }

    /// Wait for all running jobs to complete with a timeout.
    async fn await_running_jobs(&self) {
        let running_count = self.running_jobs.read().await.len();
        if running_count == 0 {
            tracing::info!("No running jobs to wait for during shutdown");
            return;
        }

        tracing::info!(
            "Graceful shutdown: waiting for {} running job(s) to complete (timeout: {:?})",
            running_count,
            self.shutdown_timeout
        );

        let start = Instant::now();
        let deadline = start + self.shutdown_timeout;

        loop {
            let mut running = self.running_jobs.write().await;
            running.retain(|_, (_, handle)| !handle.is_finished());
            let remaining = running.len();
            drop(running);

            if remaining == 0 {
                tracing::info!("All running jobs completed gracefully in {:?}", start.elapsed());
                break;
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    "Graceful shutdown timeout ({:?}) exceeded with {} job(s) still running",
                    self.shutdown_timeout,
                    remaining
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn earliest_fire_time(triggers: &[Trigger]) -> Option<DateTime<Utc>> {
    triggers.iter().filter_map(Trigger::next_fire_time).min()
}

/// Monotonic instant corresponding to a wall-clock fire time.
fn instant_at(fire_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Instant {
    let delay = fire_time
        .and_then(|t| (t - now).to_std().ok())
        .unwrap_or(Duration::ZERO);
    Instant::now() + delay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::Job;
    use crate::storage::InMemoryStorage;
    use crate::testing::RecordingExecutor;
    use chrono::TimeDelta;

    async fn start() -> (
        SchedulerHandle,
        JoinHandle<()>,
        Arc<JobStore<InMemoryStorage>>,
        Arc<RecordingExecutor>,
    ) {
        let executor = Arc::new(RecordingExecutor::new());
        let scheduler = Scheduler::new(JobStore::new(Arc::new(InMemoryStorage::new())))
            .with_executor(executor.clone())
            .with_idle_wait(Duration::from_millis(50));
        let store = Arc::clone(scheduler.store());
        let (handle, task, _) = scheduler.start().await.unwrap();
        (handle, task, store, executor)
    }

    fn every(name: &str, job: &JobKey, interval: Duration) -> Trigger {
        Trigger::new(
            TriggerKey::new(name, "g"),
            job.clone(),
            SimpleSchedule::repeat_forever(interval),
        )
    }

    #[tokio::test]
    async fn test_scheduler_fires_due_trigger() {
        let (handle, task, store, executor) = start().await;
        let job = JobKey::new("tick", "g");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        store
            .store_trigger(
                every("t", &job, Duration::from_millis(200))
                    .start_at(Utc::now() + TimeDelta::milliseconds(50)),
                false,
            )
            .await
            .unwrap();

        assert!(executor.wait_for(2, Duration::from_secs(3)).await);
        handle.shutdown().await.unwrap();
        let _ = task.await;

        assert_eq!(handle.state().await, SchedulerState::Stopped);
        assert_eq!(store.scheduler_state().await.unwrap(), "Shutdown");
        let executions = executor.executions().await;
        assert!(executions.iter().all(|e| e.job_key == job));
    }

    #[tokio::test]
    async fn test_manual_job_trigger() {
        let (handle, task, store, executor) = start().await;
        let job = JobKey::new("manual", "g");
        store
            .store_job(Job::new(job.clone()).with_durability(true), false)
            .await
            .unwrap();

        let key = handle.trigger_job(job.clone()).await.unwrap();
        assert_eq!(key.group(), MANUAL_TRIGGER_GROUP);
        assert!(executor.wait_for(1, Duration::from_secs(2)).await);

        handle.shutdown().await.unwrap();
        let _ = task.await;

        // The one-shot trigger is deleted after it ran; the durable job stays.
        assert!(!store.check_trigger_exists(&key).await.unwrap());
        assert!(store.check_job_exists(&job).await.unwrap());
    }

    #[tokio::test]
    async fn test_manual_trigger_of_missing_job() {
        let (handle, task, _, _) = start().await;
        let result = handle.trigger_job(JobKey::new("missing", "g")).await;
        assert!(matches!(result, Err(SchedulerError::JobNotFound(_))));
        handle.shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_pause_and_resume_scheduler() {
        let (handle, task, store, executor) = start().await;
        assert!(handle.is_running().await);

        handle.pause().await.unwrap();
        assert!(handle.is_paused().await);
        assert_eq!(store.scheduler_state().await.unwrap(), "Paused");

        let job = JobKey::new("held", "g");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        store
            .store_trigger(
                Trigger::new(TriggerKey::new("once", "g"), job, SimpleSchedule::once())
                    .start_at(Utc::now()),
                false,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(executor.execution_count().await, 0);

        handle.resume().await.unwrap();
        assert!(handle.is_running().await);
        assert!(executor.wait_for(1, Duration::from_secs(2)).await);

        handle.shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_failed_execution_with_unschedule_completes_trigger() {
        let executor = Arc::new(RecordingExecutor::new().failing_with(
            crate::core::job::JobExecutionError::new("boom").unschedule_firing_trigger(),
        ));
        let scheduler = Scheduler::new(JobStore::new(Arc::new(InMemoryStorage::new())))
            .with_executor(executor.clone())
            .with_idle_wait(Duration::from_millis(50));
        let store = Arc::clone(scheduler.store());
        let (handle, task, _) = scheduler.start().await.unwrap();

        let job = JobKey::new("flaky", "g");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        let key = TriggerKey::new("t", "g");
        store
            .store_trigger(
                every("t", &job, Duration::from_secs(60)).start_at(Utc::now()),
                false,
            )
            .await
            .unwrap();

        assert!(executor.wait_for(1, Duration::from_secs(2)).await);
        handle.shutdown().await.unwrap();
        let _ = task.await;

        assert_eq!(
            store.trigger_state(&key).await.unwrap(),
            crate::core::state::TriggerStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_graceful_shutdown_waits_for_running_jobs() {
        let executor = Arc::new(RecordingExecutor::new().with_delay(Duration::from_millis(300)));
        let scheduler = Scheduler::new(JobStore::new(Arc::new(InMemoryStorage::new())))
            .with_executor(executor.clone())
            .with_idle_wait(Duration::from_millis(50))
            .with_shutdown_timeout(Duration::from_secs(5));
        let store = Arc::clone(scheduler.store());
        let (handle, task, _) = scheduler.start().await.unwrap();

        let job = JobKey::new("slow", "g");
        store.store_job(Job::new(job.clone()), false).await.unwrap();
        store
            .store_trigger(
                Trigger::new(TriggerKey::new("once", "g"), job.clone(), SimpleSchedule::once())
                    .start_at(Utc::now()),
                false,
            )
            .await
            .unwrap();

        assert!(executor.wait_for_started(1, Duration::from_secs(2)).await);
        handle.shutdown().await.unwrap();
        let _ = task.await;

        assert_eq!(executor.execution_count().await, 1);
        // Completion ran before shutdown returned, so the trigger is gone.
        assert_eq!(store.number_of_triggers().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_max_concurrent_jobs_limits_executions() {
        let executor = Arc::new(RecordingExecutor::new().with_delay(Duration::from_millis(300)));
        let scheduler = Scheduler::new(JobStore::new(Arc::new(InMemoryStorage::new())))
            .with_executor(executor.clone())
            .with_idle_wait(Duration::from_millis(20))
            .with_batch_size(10)
            .with_max_concurrent_jobs(1);
        let store = Arc::clone(scheduler.store());
        let (handle, task, _) = scheduler.start().await.unwrap();

        let job = JobKey::new("j", "g");
        store
            .store_job(Job::new(job.clone()).with_durability(true), false)
            .await
            .unwrap();
        for i in 0..3 {
            store
                .store_trigger(
                    Trigger::new(
                        TriggerKey::new(format!("t{}", i), "g"),
                        job.clone(),
                        SimpleSchedule::once(),
                    )
                    .start_at(Utc::now()),
                    false,
                )
                .await
                .unwrap();
        }

        assert!(executor.wait_for_started(1, Duration::from_secs(2)).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(executor.started_count().await, 1);

        assert!(executor.wait_for(3, Duration::from_secs(5)).await);
        handle.shutdown().await.unwrap();
        let _ = task.await;
    }
}
