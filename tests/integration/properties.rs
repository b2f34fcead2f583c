//! Scheduling invariants exercised through the public job store API.

use crate::common::{every_minute, fixed_now, memory_store, store_job};
use cadence::{
    CompletedExecutionInstruction, CronSchedule, GroupMatcher, Job, JobKey, JobStoreError,
    MisfireInstruction, SimpleSchedule, Trigger, TriggerKey, TriggerStatus,
};
use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;

/// Test: Due triggers come out in fire-time order, higher priority first on ties.
#[tokio::test]
async fn test_acquisition_ordering() {
    let (store, _, _) = memory_store();
    let job = store_job(&store, "job", false).await;
    let now = fixed_now();

    for (name, offset, priority) in [
        ("late", 30, 5),
        ("early", 10, 1),
        ("tie_low", 20, 2),
        ("tie_high", 20, 9),
    ] {
        store
            .store_trigger(
                every_minute(name, &job, now + TimeDelta::seconds(offset)).with_priority(priority),
                false,
            )
            .await
            .unwrap();
    }

    let acquired = store
        .acquire_next_triggers(now + TimeDelta::seconds(30), 10, Duration::ZERO)
        .await
        .unwrap();
    let names: Vec<&str> = acquired.iter().map(|t| t.key().name()).collect();
    assert_eq!(names, vec!["early", "tie_high", "tie_low", "late"]);

    // Fire instance ids are unique.
    let mut ids: Vec<&str> = acquired.iter().filter_map(|t| t.fire_instance_id()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

/// Test: Two due triggers of a non-concurrent job yield one acquisition.
#[tokio::test]
async fn test_non_concurrency_exclusion() {
    let (store, _, _) = memory_store();
    let job = store_job(&store, "exclusive", true).await;
    let now = fixed_now();

    store
        .store_trigger(every_minute("first", &job, now), false)
        .await
        .unwrap();
    store
        .store_trigger(every_minute("second", &job, now + TimeDelta::seconds(1)), false)
        .await
        .unwrap();

    let acquired = store
        .acquire_next_triggers(now + TimeDelta::seconds(5), 2, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(acquired.len(), 1);
    assert_eq!(acquired[0].key(), &TriggerKey::new("first", "g"));
    assert_eq!(
        store
            .trigger_state(&TriggerKey::new("second", "g"))
            .await
            .unwrap(),
        TriggerStatus::Normal
    );
}

/// Test: Back-to-back passes never put two triggers of a non-concurrent job in flight.
#[tokio::test]
async fn test_non_concurrency_exclusion_across_passes() {
    let (store, _, _) = memory_store();
    let job = store_job(&store, "exclusive", true).await;
    let now = fixed_now();
    store
        .store_trigger(every_minute("t1", &job, now), false)
        .await
        .unwrap();
    store
        .store_trigger(every_minute("t2", &job, now), false)
        .await
        .unwrap();

    let mut acquired = Vec::new();
    for _ in 0..2 {
        acquired.extend(
            store
                .acquire_next_triggers(now, 1, Duration::ZERO)
                .await
                .unwrap(),
        );
    }
    assert_eq!(acquired.len(), 1);

    let bundles = store.triggers_fired(&acquired).await.unwrap();
    assert_eq!(bundles.len(), 1);
    assert!(store.blocked_jobs().await.unwrap().contains(&job));

    let sibling = if bundles[0].trigger.key().name() == "t1" {
        "t2"
    } else {
        "t1"
    };
    assert_eq!(
        store
            .trigger_state(&TriggerKey::new(sibling, "g"))
            .await
            .unwrap(),
        TriggerStatus::Blocked
    );
}

/// Test: Concurrent acquisitions hand out disjoint triggers.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_acquisitions_are_disjoint() {
    let (store, _, _) = memory_store();
    let job = store_job(&store, "job", false).await;
    let store = Arc::new(store);
    let now = fixed_now();
    for i in 0..20 {
        store
            .store_trigger(every_minute(&format!("t{}", i), &job, now), false)
            .await
            .unwrap();
    }

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .acquire_next_triggers(now, 15, Duration::ZERO)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut keys = Vec::new();
    for task in tasks {
        keys.extend(task.await.unwrap().into_iter().map(|t| t.key().clone()));
    }
    assert_eq!(keys.len(), 20);
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 20);
}

/// Test: An exhausted schedule is finalized by misfire handling.
#[tokio::test]
async fn test_misfire_finalization() {
    let (store, _, signaler) = memory_store();
    let job = store_job(&store, "job", false).await;
    let missed = fixed_now() - TimeDelta::hours(1);
    let trigger = Trigger::new(TriggerKey::new("once", "g"), job, SimpleSchedule::once())
        .start_at(missed)
        .with_next_fire_time(Some(missed))
        .with_misfire_instruction(MisfireInstruction::RescheduleNextWithRemainingCount);
    store.store_trigger(trigger.clone(), false).await.unwrap();

    // Acquisition runs misfire handling and finds nothing left to fire.
    let acquired = store
        .acquire_next_triggers(fixed_now(), 5, Duration::ZERO)
        .await
        .unwrap();
    assert!(acquired.is_empty());

    let loaded = store.retrieve_trigger(trigger.key()).await.unwrap().unwrap();
    assert_eq!(loaded.next_fire_time(), None);
    assert_eq!(
        store.trigger_state(trigger.key()).await.unwrap(),
        TriggerStatus::Complete
    );
    assert_eq!(signaler.finalized().await, vec![trigger.key().clone()]);
}

/// Test: A late repeating trigger is rescheduled and stays eligible.
#[tokio::test]
async fn test_misfire_reschedules_repeating_trigger() {
    let (store, _, signaler) = memory_store();
    let job = store_job(&store, "job", false).await;
    let now = fixed_now();
    let trigger = Trigger::new(
        TriggerKey::new("repeat", "g"),
        job,
        SimpleSchedule::repeat_forever(Duration::from_secs(70)),
    )
    .start_at(now - TimeDelta::seconds(10))
    .with_next_fire_time(Some(now - TimeDelta::seconds(10)));
    store.store_trigger(trigger.clone(), false).await.unwrap();

    assert!(store.apply_misfire(trigger.key()).await.unwrap());
    let loaded = store.retrieve_trigger(trigger.key()).await.unwrap().unwrap();
    assert_eq!(loaded.next_fire_time(), Some(now + TimeDelta::seconds(60)));
    assert_eq!(
        store.trigger_state(trigger.key()).await.unwrap(),
        TriggerStatus::Normal
    );
    assert_eq!(signaler.misfired().await, vec![trigger.key().clone()]);
}

/// Test: Stored triggers read back with the same parameters.
#[tokio::test]
async fn test_trigger_round_trip() {
    let (store, _, _) = memory_store();
    let job = store_job(&store, "job", false).await;
    store
        .store_calendar("weekdays", cadence::Calendar::new(), false, false)
        .await
        .unwrap();

    let trigger = Trigger::new(
        TriggerKey::new("cron", "reports"),
        job,
        CronSchedule::new("0 30 8 * * *")
            .unwrap()
            .with_timezone("Europe/Paris")
            .unwrap(),
    )
    .start_at(fixed_now())
    .with_priority(7)
    .with_calendar("weekdays");
    store.store_trigger(trigger.clone(), false).await.unwrap();

    let loaded = store.retrieve_trigger(trigger.key()).await.unwrap().unwrap();
    assert_eq!(loaded.key(), trigger.key());
    assert_eq!(loaded.priority(), 7);
    assert_eq!(loaded.calendar_name(), Some("weekdays"));
    assert_eq!(loaded.schedule(), trigger.schedule());
    assert!(loaded.next_fire_time().is_some());
}

/// Test: Firing a non-concurrent job blocks siblings until completion.
#[tokio::test]
async fn test_blocking_and_unblocking() {
    let (store, _, _) = memory_store();
    let job_key = store_job(&store, "exclusive", true).await;
    let now = fixed_now();
    store
        .store_trigger(every_minute("a", &job_key, now), false)
        .await
        .unwrap();
    store
        .store_trigger(every_minute("b", &job_key, now + TimeDelta::hours(1)), false)
        .await
        .unwrap();

    let acquired = store
        .acquire_next_triggers(now, 1, Duration::ZERO)
        .await
        .unwrap();
    let bundles = store.triggers_fired(&acquired).await.unwrap();
    assert_eq!(bundles.len(), 1);

    let sibling = TriggerKey::new("b", "g");
    assert_eq!(
        store.trigger_state(&sibling).await.unwrap(),
        TriggerStatus::Blocked
    );
    assert!(store.blocked_jobs().await.unwrap().contains(&job_key));

    let bundle = &bundles[0];
    store
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::NoInstruction,
        )
        .await
        .unwrap();
    assert_eq!(
        store.trigger_state(&sibling).await.unwrap(),
        TriggerStatus::Normal
    );
    assert!(store.blocked_jobs().await.unwrap().is_empty());
}

/// Test: Only the last trigger of a non-durable job takes the job with it.
#[tokio::test]
async fn test_cascade_deletion() {
    let (store, _, signaler) = memory_store();
    let job = store_job(&store, "job", false).await;
    store
        .store_trigger(every_minute("one", &job, fixed_now()), false)
        .await
        .unwrap();
    store
        .store_trigger(every_minute("two", &job, fixed_now()), false)
        .await
        .unwrap();

    assert!(store.remove_trigger(&TriggerKey::new("one", "g")).await.unwrap());
    assert!(store.check_job_exists(&job).await.unwrap());
    assert!(signaler.jobs_deleted().await.is_empty());

    assert!(store.remove_trigger(&TriggerKey::new("two", "g")).await.unwrap());
    assert!(!store.check_job_exists(&job).await.unwrap());
    assert_eq!(signaler.jobs_deleted().await, vec![job]);
}

/// Test: Triggers added to a paused group start paused.
#[tokio::test]
async fn test_pause_propagation() {
    let (store, _, _) = memory_store();
    let job = store_job(&store, "job", false).await;
    let now = fixed_now();

    let paused = store
        .pause_triggers(&GroupMatcher::group_equals("g"))
        .await
        .unwrap();
    assert_eq!(paused, vec!["g".to_string()]);

    store
        .store_trigger(every_minute("late_joiner", &job, now), false)
        .await
        .unwrap();
    assert_eq!(
        store
            .trigger_state(&TriggerKey::new("late_joiner", "g"))
            .await
            .unwrap(),
        TriggerStatus::Paused
    );

    // Nothing in a paused group is acquired.
    assert!(
        store
            .acquire_next_triggers(now + TimeDelta::minutes(5), 10, Duration::ZERO)
            .await
            .unwrap()
            .is_empty()
    );

    store
        .resume_triggers(&GroupMatcher::group_equals("g"))
        .await
        .unwrap();
    assert!(!store.is_trigger_group_paused("g").await.unwrap());
    assert_eq!(
        store
            .trigger_state(&TriggerKey::new("late_joiner", "g"))
            .await
            .unwrap(),
        TriggerStatus::Normal
    );
}

/// Test: Unsupported matchers are rejected for group pause.
#[tokio::test]
async fn test_group_pause_requires_equality_matcher() {
    let (store, _, _) = memory_store();
    let result = store
        .pause_triggers(&GroupMatcher::group_starts_with("g"))
        .await;
    assert!(matches!(result, Err(JobStoreError::UnsupportedMatcher(_))));
}

/// Test: Conflicting keys fail a bulk store without writing anything.
#[tokio::test]
async fn test_bulk_store_is_all_or_nothing() {
    let (store, _, _) = memory_store();
    let existing = store_job(&store, "existing", false).await;
    let fresh = JobKey::new("fresh", "g");

    let result = store
        .store_jobs_and_triggers(
            vec![
                (
                    Job::new(fresh.clone()),
                    vec![every_minute("t1", &fresh, fixed_now())],
                ),
                (Job::new(existing), vec![]),
            ],
            false,
        )
        .await;
    assert!(matches!(result, Err(JobStoreError::AlreadyExists { .. })));
    assert!(!store.check_job_exists(&fresh).await.unwrap());
    assert_eq!(store.number_of_triggers().await.unwrap(), 0);
}

/// Test: Replacing a trigger keeps it on the same job.
#[tokio::test]
async fn test_replace_trigger() {
    let (store, _, _) = memory_store();
    let job = store_job(&store, "job", false).await;
    let other = store_job(&store, "other", false).await;
    let key = TriggerKey::new("t", "g");
    store
        .store_trigger(every_minute("t", &job, fixed_now()), false)
        .await
        .unwrap();

    let replacement = every_minute("t", &job, fixed_now()).with_priority(9);
    assert!(store.replace_trigger(&key, replacement).await.unwrap());
    assert_eq!(
        store.retrieve_trigger(&key).await.unwrap().unwrap().priority(),
        9
    );

    let wrong_job = every_minute("t", &other, fixed_now());
    assert!(matches!(
        store.replace_trigger(&key, wrong_job).await,
        Err(JobStoreError::ReferentialIntegrity(_))
    ));

    let missing = every_minute("missing", &job, fixed_now());
    assert!(
        !store
            .replace_trigger(&TriggerKey::new("missing", "g"), missing)
            .await
            .unwrap()
    );
}

/// Test: A misfire threshold of zero is a configuration error.
#[tokio::test]
async fn test_misfire_threshold_must_be_positive() {
    let (store, _, _) = memory_store();
    assert!(matches!(
        store.set_misfire_threshold(Duration::ZERO),
        Err(JobStoreError::Configuration(_))
    ));
    store.set_misfire_threshold(Duration::from_secs(30)).unwrap();
    assert_eq!(store.misfire_threshold(), Duration::from_secs(30));
}
