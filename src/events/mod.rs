//! Scheduling events and host signaling.
//!
//! The job store reports misfires, finalized triggers, cascaded job
//! deletions and scheduling changes through [`SchedulerSignaler`]. The
//! [`EventBus`] implements it by fanning [`Event`]s out to registered
//! handlers; the host scheduler also emits firing and completion events on
//! the same bus.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::trigger::{CompletedExecutionInstruction, Trigger};
use crate::core::types::{JobKey, TriggerKey};

/// Lifecycle events emitted while scheduling.
#[derive(Debug, Clone)]
pub enum Event {
    /// A trigger missed its fire time by more than the misfire threshold.
    TriggerMisfired {
        trigger_key: TriggerKey,
        job_key: JobKey,
        /// The fire time that was missed.
        missed_fire_time: Option<DateTime<Utc>>,
        timestamp: Instant,
    },

    /// A trigger will never fire again.
    TriggerFinalized {
        trigger_key: TriggerKey,
        job_key: JobKey,
        timestamp: Instant,
    },

    /// A job was deleted because its last trigger went away.
    JobDeleted { job_key: JobKey, timestamp: Instant },

    /// The set of due triggers changed.
    ///
    /// `candidate` is the earliest new fire time when known.
    SchedulingChanged {
        candidate: Option<DateTime<Utc>>,
        timestamp: Instant,
    },

    /// A trigger fired and its job was handed to the executor.
    TriggerFired {
        trigger_key: TriggerKey,
        job_key: JobKey,
        fire_instance_id: String,
        scheduled_fire_time: Option<DateTime<Utc>>,
        timestamp: Instant,
    },

    /// A job execution finished and was reconciled into the store.
    JobCompleted {
        trigger_key: TriggerKey,
        job_key: JobKey,
        success: bool,
        instruction: CompletedExecutionInstruction,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::TriggerMisfired { timestamp, .. } => *timestamp,
            Event::TriggerFinalized { timestamp, .. } => *timestamp,
            Event::JobDeleted { timestamp, .. } => *timestamp,
            Event::SchedulingChanged { timestamp, .. } => *timestamp,
            Event::TriggerFired { timestamp, .. } => *timestamp,
            Event::JobCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Create a TriggerMisfired event.
    pub fn trigger_misfired(trigger: &Trigger) -> Self {
        Event::TriggerMisfired {
            trigger_key: trigger.key().clone(),
            job_key: trigger.job_key().clone(),
            missed_fire_time: trigger.next_fire_time(),
            timestamp: Instant::now(),
        }
    }

    /// Create a TriggerFinalized event.
    pub fn trigger_finalized(trigger: &Trigger) -> Self {
        Event::TriggerFinalized {
            trigger_key: trigger.key().clone(),
            job_key: trigger.job_key().clone(),
            timestamp: Instant::now(),
        }
    }

    /// Create a JobDeleted event.
    pub fn job_deleted(job_key: JobKey) -> Self {
        Event::JobDeleted {
            job_key,
            timestamp: Instant::now(),
        }
    }

    /// Create a SchedulingChanged event.
    pub fn scheduling_changed(candidate: Option<DateTime<Utc>>) -> Self {
        Event::SchedulingChanged {
            candidate,
            timestamp: Instant::now(),
        }
    }

    /// Create a TriggerFired event.
    pub fn trigger_fired(trigger: &Trigger, scheduled_fire_time: Option<DateTime<Utc>>) -> Self {
        Event::TriggerFired {
            trigger_key: trigger.key().clone(),
            job_key: trigger.job_key().clone(),
            fire_instance_id: trigger.fire_instance_id().unwrap_or_default().to_string(),
            scheduled_fire_time,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(
        trigger_key: TriggerKey,
        job_key: JobKey,
        success: bool,
        instruction: CompletedExecutionInstruction,
        duration: Duration,
    ) -> Self {
        Event::JobCompleted {
            trigger_key,
            job_key,
            success,
            instruction,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Callbacks from the job store to its host.
///
/// Fire-and-forget: nothing the host does here feeds back into the store.
#[async_trait]
pub trait SchedulerSignaler: Send + Sync {
    async fn notify_trigger_listeners_misfired(&self, trigger: &Trigger);

    async fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger);

    async fn notify_scheduler_listeners_job_deleted(&self, job_key: &JobKey);

    /// Wake the scheduling loop; `candidate` is the earliest new fire time if known.
    async fn signal_scheduling_change(&self, candidate: Option<DateTime<Utc>>);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulerSignaler for EventBus {
    async fn notify_trigger_listeners_misfired(&self, trigger: &Trigger) {
        self.emit(Event::trigger_misfired(trigger)).await;
    }

    async fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger) {
        self.emit(Event::trigger_finalized(trigger)).await;
    }

    async fn notify_scheduler_listeners_job_deleted(&self, job_key: &JobKey) {
        self.emit(Event::job_deleted(job_key.clone())).await;
    }

    async fn signal_scheduling_change(&self, candidate: Option<DateTime<Utc>>) {
        self.emit(Event::scheduling_changed(candidate)).await;
    }
}
