//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use cadence::testing::{ManualClock, RecordingSignaler};
use cadence::{
    InMemoryStorage, Job, JobKey, JobStore, SimpleSchedule, Storage, Trigger, TriggerKey,
    TriggerStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Fixed "now" for clock-driven tests.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
}

/// A store over in-memory storage with a manual clock and recording signaler.
pub fn memory_store() -> (
    JobStore<InMemoryStorage>,
    Arc<ManualClock>,
    Arc<RecordingSignaler>,
) {
    let clock = Arc::new(ManualClock::new(fixed_now()));
    let signaler = Arc::new(RecordingSignaler::new());
    let store = JobStore::new(Arc::new(InMemoryStorage::new()))
        .with_clock(clock.clone())
        .with_signaler(signaler.clone());
    (store, clock, signaler)
}

/// A trigger in group "g" repeating every minute from `start`.
pub fn every_minute(name: &str, job: &JobKey, start: DateTime<Utc>) -> Trigger {
    Trigger::new(
        TriggerKey::new(name, "g"),
        job.clone(),
        SimpleSchedule::repeat_forever(Duration::from_secs(60)),
    )
    .start_at(start)
}

/// Store a job in group "g" and return its key.
pub async fn store_job<S: Storage>(store: &JobStore<S>, name: &str, exclusive: bool) -> JobKey {
    let key = JobKey::new(name, "g");
    store
        .store_job(
            Job::new(key.clone()).with_concurrent_execution_disallowed(exclusive),
            false,
        )
        .await
        .unwrap();
    key
}

/// Wait for a trigger to reach an expected status, polling the store.
///
/// # Panics
///
/// Panics if the timeout is reached before the trigger reaches the expected status.
pub async fn wait_for_trigger_status<S: Storage>(
    store: &JobStore<S>,
    key: &TriggerKey,
    expected: TriggerStatus,
    timeout: Duration,
) {
    let start = tokio::time::Instant::now();
    loop {
        let status = store.trigger_state(key).await.unwrap();
        if status == expected {
            return;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for trigger {} to reach {:?}, current status: {:?}",
                key, expected, status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
