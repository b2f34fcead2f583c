//! SQLite persistence scenarios.
//!
//! Tests that scheduling state survives reopening the database and that
//! startup recovery repairs what an interrupted process left behind.

use crate::common::{every_minute, fixed_now, store_job};
use cadence::testing::ManualClock;
use cadence::{
    Calendar, GroupMatcher, Job, JobKey, JobStore, SqliteStorage, TriggerKey, TriggerStatus,
};
use chrono::{NaiveDate, TimeDelta, Weekday};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn open(path: &Path, clock: Arc<ManualClock>) -> JobStore<SqliteStorage> {
    let storage = SqliteStorage::new(path).await.unwrap();
    let store = JobStore::new(Arc::new(storage)).with_clock(clock);
    store.initialize().await.unwrap();
    store
}

/// Test: Jobs, triggers, calendars and paused groups survive a reopen.
#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("cadence.db");
    let clock = Arc::new(ManualClock::new(fixed_now()));

    {
        let store = open(&db, clock.clone()).await;
        store
            .store_calendar(
                "holidays",
                Calendar::new()
                    .exclude_date(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap())
                    .exclude_weekday(Weekday::Sun),
                false,
                false,
            )
            .await
            .unwrap();
        let job = JobKey::new("report", "g");
        store
            .store_job(
                Job::new(job.clone())
                    .with_durability(true)
                    .with_data("command", "echo"),
                false,
            )
            .await
            .unwrap();
        store
            .store_trigger(
                every_minute("t", &job, fixed_now())
                    .with_calendar("holidays")
                    .with_priority(3),
                false,
            )
            .await
            .unwrap();
        store
            .pause_jobs(&GroupMatcher::group_equals("paused"))
            .await
            .unwrap();
        store.storage().close().await;
    }

    let store = open(&db, clock).await;
    assert_eq!(store.number_of_jobs().await.unwrap(), 1);
    assert_eq!(store.calendar_names().await.unwrap(), vec!["holidays"]);
    assert!(store.is_job_group_paused("paused").await.unwrap());

    let job = store
        .retrieve_job(&JobKey::new("report", "g"))
        .await
        .unwrap()
        .unwrap();
    assert!(job.is_durable());
    assert_eq!(job.get_data::<String>("command"), Some("echo".to_string()));

    let trigger = store
        .retrieve_trigger(&TriggerKey::new("t", "g"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trigger.priority(), 3);
    assert_eq!(trigger.calendar_name(), Some("holidays"));
    assert_eq!(trigger.next_fire_time(), Some(fixed_now()));

    let calendar = store.retrieve_calendar("holidays").await.unwrap().unwrap();
    assert!(calendar.is_date_excluded(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()));
}

/// Test: Acquisition state is persisted between calls.
#[tokio::test]
async fn test_acquired_trigger_is_not_acquired_twice() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(fixed_now()));
    let store = open(&dir.path().join("cadence.db"), clock).await;
    let job = store_job(&store, "job", false).await;
    store
        .store_trigger(every_minute("t", &job, fixed_now()), false)
        .await
        .unwrap();

    let first = store
        .acquire_next_triggers(fixed_now(), 5, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    let second = store
        .acquire_next_triggers(fixed_now(), 5, Duration::ZERO)
        .await
        .unwrap();
    assert!(second.is_empty());

    store
        .release_acquired_trigger(&TriggerKey::new("t", "g"))
        .await
        .unwrap();
    let third = store
        .acquire_next_triggers(fixed_now(), 5, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(third.len(), 1);
}

/// Test: Restart after a crash mid-execution.
#[tokio::test]
async fn test_recovery_after_interrupted_execution() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("cadence.db");
    let clock = Arc::new(ManualClock::new(fixed_now()));

    {
        let crashed = open(&db, clock.clone()).await;
        let exclusive = JobKey::new("exclusive", "g");
        crashed
            .store_job(
                Job::new(exclusive.clone())
                    .with_concurrent_execution_disallowed(true)
                    .with_requests_recovery(true),
                false,
            )
            .await
            .unwrap();
        crashed
            .store_trigger(every_minute("running", &exclusive, fixed_now()), false)
            .await
            .unwrap();
        crashed
            .store_trigger(
                every_minute("sibling", &exclusive, fixed_now() + TimeDelta::hours(1)),
                false,
            )
            .await
            .unwrap();

        let plain = store_job(&crashed, "plain", false).await;
        crashed
            .store_trigger(every_minute("reserved", &plain, fixed_now()), false)
            .await
            .unwrap();

        let acquired = crashed
            .acquire_next_triggers(fixed_now(), 10, Duration::ZERO)
            .await
            .unwrap();
        let running: Vec<_> = acquired
            .into_iter()
            .filter(|t| t.key().name() == "running")
            .collect();
        crashed.triggers_fired(&running).await.unwrap();
        assert_eq!(
            crashed
                .trigger_state(&TriggerKey::new("sibling", "g"))
                .await
                .unwrap(),
            TriggerStatus::Blocked
        );
        crashed.storage().close().await;
    }

    let restarted = open(&db, clock).await;
    let report = restarted.scheduler_started().await.unwrap();
    assert_eq!(report.released_acquired, 1);
    assert_eq!(report.unblocked, 2);
    assert_eq!(report.recovery_triggers.len(), 1);
    assert_eq!(restarted.scheduler_state().await.unwrap(), "Started");

    assert_eq!(
        restarted
            .trigger_state(&TriggerKey::new("sibling", "g"))
            .await
            .unwrap(),
        TriggerStatus::Normal
    );
    assert!(restarted.blocked_jobs().await.unwrap().is_empty());

    // The recovery trigger re-runs the interrupted job right away.
    let recovery = &report.recovery_triggers[0];
    let acquired = restarted
        .acquire_next_triggers(fixed_now(), 10, Duration::ZERO)
        .await
        .unwrap();
    assert!(acquired.iter().any(|t| t.key() == recovery));
    let bundles = restarted.triggers_fired(&acquired).await.unwrap();
    let recovered = bundles
        .iter()
        .find(|b| b.trigger.key() == recovery)
        .unwrap();
    assert!(recovered.recovering);
}

/// Test: Clearing scheduling data empties the database.
#[tokio::test]
async fn test_clear_all_scheduling_data() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(fixed_now()));
    let store = open(&dir.path().join("cadence.db"), clock).await;
    let job = store_job(&store, "job", false).await;
    store
        .store_trigger(every_minute("t", &job, fixed_now()), false)
        .await
        .unwrap();
    store
        .store_calendar("c", Calendar::new(), false, false)
        .await
        .unwrap();
    store
        .pause_triggers(&GroupMatcher::group_equals("g"))
        .await
        .unwrap();
    store.scheduler_started().await.unwrap();

    store.clear_all_scheduling_data().await.unwrap();

    assert_eq!(store.number_of_jobs().await.unwrap(), 0);
    assert_eq!(store.number_of_triggers().await.unwrap(), 0);
    assert_eq!(store.number_of_calendars().await.unwrap(), 0);
    assert!(store.paused_trigger_groups().await.unwrap().is_empty());
    assert_eq!(store.scheduler_state().await.unwrap(), "Started");
}
