//! End-to-end scheduler runs built from YAML config.

use cadence::testing::RecordingExecutor;
use cadence::{
    ConfigBuilder, EventBus, InMemoryStorage, JobKey, JobStore, Scheduler, Storage, YamlLoader,
};
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
scheduler:
  instance_name: integration
  idle_wait_ms: 20
  batch_size: 4
jobs:
  - name: poll
    group: feeds
    triggers:
      - name: every_50ms
        group: feeds
        schedule:
          type: simple
          interval_ms: 50
          repeat_count: 2
  - name: exclusive
    group: feeds
    durable: true
    concurrent_execution_disallowed: true
    triggers:
      - name: a
        group: feeds
        schedule:
          type: simple
          interval_ms: 60000
          repeat_count: 0
      - name: b
        group: feeds
        schedule:
          type: simple
          interval_ms: 60000
          repeat_count: 0
"#;

async fn scheduler_from<S: Storage + 'static>(
    yaml: &str,
    storage: Arc<S>,
) -> (Scheduler<S>, Arc<JobStore<S>>) {
    let config = YamlLoader::parse_config(yaml).unwrap();
    let store = ConfigBuilder::build_job_store(&config.scheduler, storage).unwrap();
    ConfigBuilder::apply(&config, &store, false).await.unwrap();
    let scheduler =
        ConfigBuilder::build_scheduler(&config.scheduler, store, Arc::new(EventBus::new()));
    let store = Arc::clone(scheduler.store());
    (scheduler, store)
}

async fn wait_until_job_removed<S: Storage>(store: &JobStore<S>, key: &JobKey, timeout: Duration) {
    let start = tokio::time::Instant::now();
    while store.check_job_exists(key).await.unwrap() {
        assert!(
            start.elapsed() < timeout,
            "Timeout waiting for job {} to be removed",
            key
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test: A repeating trigger fires its full count, then takes its job with it.
#[tokio::test]
async fn test_repeating_trigger_runs_to_completion() {
    let executor = Arc::new(RecordingExecutor::new());
    let (scheduler, store) = scheduler_from(CONFIG, Arc::new(InMemoryStorage::new())).await;
    let (handle, task, _) = scheduler
        .with_executor(executor.clone())
        .start()
        .await
        .unwrap();

    assert!(executor.wait_for(5, Duration::from_secs(5)).await);
    let poll = JobKey::new("poll", "feeds");
    wait_until_job_removed(&store, &poll, Duration::from_secs(2)).await;

    let executions = executor.executions().await;
    let poll_runs = executions.iter().filter(|e| e.job_key == poll).count();
    assert_eq!(poll_runs, 3);

    // Fire instance ids are never reused.
    let mut ids: Vec<_> = executions.iter().map(|e| e.fire_instance_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), executions.len());

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: Triggers of a non-concurrent job never run at the same time.
#[tokio::test]
async fn test_non_concurrent_job_runs_serially() {
    let executor = Arc::new(RecordingExecutor::new().with_delay(Duration::from_millis(200)));
    let (scheduler, store) = scheduler_from(CONFIG, Arc::new(InMemoryStorage::new())).await;
    store.remove_job(&JobKey::new("poll", "feeds")).await.unwrap();
    let (handle, task, _) = scheduler
        .with_executor(executor.clone())
        .start()
        .await
        .unwrap();

    assert!(executor.wait_for_started(1, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(executor.started_count().await, 1);

    assert!(executor.wait_for(2, Duration::from_secs(5)).await);
    let exclusive = JobKey::new("exclusive", "feeds");
    assert!(store.check_job_exists(&exclusive).await.unwrap());
    assert!(store.blocked_jobs().await.unwrap().is_empty());

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: The command executor's output persists into the job data map.
#[cfg(unix)]
#[tokio::test]
async fn test_command_output_persists_into_job_data() {
    let yaml = r#"
scheduler:
  instance_name: commands
  idle_wait_ms: 20
jobs:
  - name: greet
    durable: true
    persist_job_data_after_execution: true
    data:
      command: echo
      args: ["hello"]
    triggers:
      - name: once
        schedule:
          type: simple
          interval_ms: 1000
          repeat_count: 0
"#;
    let (scheduler, store) = scheduler_from(yaml, Arc::new(InMemoryStorage::new())).await;
    let (handle, task, _) = scheduler.start().await.unwrap();

    let key = JobKey::new("greet", "DEFAULT");
    let start = tokio::time::Instant::now();
    loop {
        let job = store.retrieve_job(&key).await.unwrap().unwrap();
        if let Some(stdout) = job.get_data::<String>("stdout") {
            assert_eq!(stdout.trim(), "hello");
            assert_eq!(job.get_data::<i64>("exit_code"), Some(0));
            break;
        }
        assert!(start.elapsed() < Duration::from_secs(5), "command never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: A scheduler over SQLite storage fires and completes triggers.
#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_backed_scheduler() {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = cadence::SqliteStorage::new(dir.path().join("cadence.db"))
        .await
        .unwrap();
    let executor = Arc::new(RecordingExecutor::new());
    let (scheduler, store) = scheduler_from(CONFIG, Arc::new(storage)).await;
    let (handle, task, _) = scheduler
        .with_executor(executor.clone())
        .start()
        .await
        .unwrap();

    assert!(executor.wait_for(5, Duration::from_secs(10)).await);
    wait_until_job_removed(&store, &JobKey::new("poll", "feeds"), Duration::from_secs(2)).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;
    assert_eq!(store.scheduler_state().await.unwrap(), "Shutdown");
}
