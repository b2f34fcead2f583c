//! Event handlers for the scheduler.
//!
//! This module contains the handler that wakes the scheduling loop when the
//! job store reports a scheduling change.

use std::sync::Arc;
use tokio::sync::Notify;

use crate::events::{Event, EventHandler};

/// Wakes the scheduling loop on `SchedulingChanged` events.
pub(crate) struct SchedulingWakeup {
    pub(crate) notify: Arc<Notify>,
}

#[async_trait::async_trait]
impl EventHandler for SchedulingWakeup {
    async fn handle(&self, event: &Event) {
        if let Event::SchedulingChanged { candidate, .. } = event {
            tracing::trace!(candidate = ?candidate, "Scheduling changed, waking scheduler");
            self.notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wakes_on_scheduling_change_only() {
        let notify = Arc::new(Notify::new());
        let handler = SchedulingWakeup {
            notify: notify.clone(),
        };

        handler
            .handle(&Event::job_deleted(crate::core::types::JobKey::new("j", "g")))
            .await;
        let woken = tokio::time::timeout(Duration::from_millis(20), notify.notified()).await;
        assert!(woken.is_err());

        handler.handle(&Event::scheduling_changed(None)).await;
        let woken = tokio::time::timeout(Duration::from_millis(20), notify.notified()).await;
        assert!(woken.is_ok());
    }
}
