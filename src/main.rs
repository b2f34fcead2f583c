//! cadence - persistent trigger scheduler.
//!
//! Usage:
//!   cadence run <config>                 Run the scheduler with the jobs from a config file
//!   cadence validate <config>            Validate a config file without running
//!   cadence list <config>                List jobs, triggers and next fire times
//!   cadence trigger <config> <group.name> Fire one job now and wait for it

use cadence::config::{CadenceConfig, StorageConfig};
use cadence::{
    ConfigBuilder, Event, EventBus, EventHandler, GroupMatcher, InMemoryStorage, JobKey, JobStore,
    Storage, YamlLoader,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// cadence - persistent trigger scheduler
#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler with the jobs from a config file
    Run {
        /// Path to the YAML config file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Maximum concurrent jobs (overrides the config file)
        #[arg(short = 'j', long)]
        max_jobs: Option<usize>,

        /// Idle wait between acquisition passes in milliseconds (overrides the config file)
        #[arg(long)]
        idle_wait_ms: Option<u64>,
    },

    /// Validate a config file without running
    Validate {
        /// Path to the YAML config file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List jobs, triggers and their next fire times
    List {
        /// Path to the YAML config file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Fire a job once, now, and wait for it to finish
    Trigger {
        /// Path to the YAML config file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Job key as group.name (a bare name uses the DEFAULT group)
        #[arg(value_name = "JOB")]
        job: String,
    },
}

/// Logging event handler for scheduling events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TriggerFired {
                trigger_key,
                job_key,
                fire_instance_id,
                ..
            } => {
                info!(
                    "Job '{}' fired by trigger '{}' (fire: {})",
                    job_key, trigger_key, fire_instance_id
                );
            }
            Event::JobCompleted {
                job_key,
                success,
                duration,
                instruction,
                ..
            } => {
                if *success {
                    info!(
                        "Job '{}' completed successfully in {:?} ({:?})",
                        job_key, duration, instruction
                    );
                } else {
                    error!(
                        "Job '{}' failed after {:?} ({:?})",
                        job_key, duration, instruction
                    );
                }
            }
            Event::TriggerMisfired {
                trigger_key,
                missed_fire_time,
                ..
            } => {
                warn!(
                    "Trigger '{}' misfired (missed: {:?})",
                    trigger_key, missed_fire_time
                );
            }
            Event::TriggerFinalized { trigger_key, .. } => {
                info!("Trigger '{}' will not fire again", trigger_key);
            }
            Event::JobDeleted { job_key, .. } => {
                info!("Job '{}' deleted with its last trigger", job_key);
            }
            Event::SchedulingChanged { .. } => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            max_jobs,
            idle_wait_ms,
        } => {
            let mut config = YamlLoader::load_config(&config)?;
            if let Some(max) = max_jobs {
                config.scheduler.max_concurrent_jobs = Some(max);
            }
            if let Some(ms) = idle_wait_ms {
                config.scheduler.idle_wait_ms = ms;
            }
            with_storage(config, Mode::Run).await?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::List { config } => {
            list_jobs(config).await?;
        }
        Commands::Trigger { config, job } => {
            let config = YamlLoader::load_config(&config)?;
            with_storage(config, Mode::Trigger(JobKey::from(job.as_str()))).await?;
        }
    }

    Ok(())
}

enum Mode {
    Run,
    Trigger(JobKey),
}

/// Open the configured storage backend and run in the given mode.
async fn with_storage(config: CadenceConfig, mode: Mode) -> Result<(), Box<dyn std::error::Error>> {
    match config.storage.clone() {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            run_mode(config, Arc::new(InMemoryStorage::new()), mode).await
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("Using SQLite storage at {}", path);
            let storage = cadence::SqliteStorage::new(&path).await?;
            run_mode(config, Arc::new(storage), mode).await
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            Err("SQLite storage requires the 'sqlite' feature".into())
        }
    }
}

async fn run_mode<S: Storage + 'static>(
    config: CadenceConfig,
    storage: Arc<S>,
    mode: Mode,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = ConfigBuilder::build_job_store(&config.scheduler, storage)?;
    store.initialize().await?;
    let added = ConfigBuilder::apply_new(&config, &store).await?;
    info!("Loaded {} new job(s) from config", added);

    match mode {
        Mode::Run => run_scheduler(&config, store).await,
        Mode::Trigger(job) => trigger_job(&config, store, job).await,
    }
}

/// Run the scheduler until Ctrl+C.
async fn run_scheduler<S: Storage + 'static>(
    config: &CadenceConfig,
    store: JobStore<S>,
) -> Result<(), Box<dyn std::error::Error>> {
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let scheduler = ConfigBuilder::build_scheduler(&config.scheduler, store, event_bus);

    info!(
        "Starting scheduler '{}' (idle wait: {}ms, batch size: {})...",
        config.scheduler.instance_name, config.scheduler.idle_wait_ms, config.scheduler.batch_size
    );
    info!("Press Ctrl+C to stop");

    let (handle, scheduler_task, report) = scheduler.start().await?;
    if report != cadence::RecoveryReport::default() {
        info!("Recovered interrupted state: {:?}", report);
    }

    // Wait for Ctrl+C
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Scheduler stopped");
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate a config file without running.
fn validate_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating config: {}", path.display());

    match YamlLoader::load_config(&path) {
        Ok(config) => {
            let triggers: usize = config.jobs.iter().map(|j| j.triggers.len()).sum();
            info!(
                "Config is valid: {} calendar(s), {} job(s), {} trigger(s)",
                config.calendars.len(),
                config.jobs.len(),
                triggers
            );
            for job in &config.jobs {
                info!("  - {}: OK", job.key_string());
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List the jobs and triggers defined in a config file.
async fn list_jobs(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = YamlLoader::load_config(&path)?;

    if config.jobs.is_empty() {
        println!("No jobs found in {}", path.display());
        return Ok(());
    }

    // Load into a scratch store so next fire times account for calendars.
    let store = ConfigBuilder::build_job_store(&config.scheduler, Arc::new(InMemoryStorage::new()))?;
    ConfigBuilder::apply(&config, &store, false).await?;

    println!("Jobs in {}:", path.display());
    println!();

    for job_key in store.job_keys(&GroupMatcher::any_group()).await? {
        let Some(job) = store.retrieve_job(&job_key).await? else {
            continue;
        };
        println!("Job: {}", job_key);
        if let Some(description) = job.description() {
            println!("  Description: {}", description);
        }
        println!("  Durable: {}", job.is_durable());
        println!(
            "  Concurrent execution: {}",
            if job.is_concurrent_execution_disallowed() {
                "disallowed"
            } else {
                "allowed"
            }
        );

        let triggers = store.triggers_for_job(&job_key).await?;
        if triggers.is_empty() {
            println!("  Triggers: none");
        }
        for trigger in &triggers {
            let next = trigger
                .next_fire_time()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            let calendar = trigger
                .calendar_name()
                .map(|c| format!(", calendar: {}", c))
                .unwrap_or_default();
            println!(
                "    - {} ({}, priority {}{}): next fire {}",
                trigger.key(),
                trigger.schedule().kind_name(),
                trigger.priority(),
                calendar,
                next
            );
        }

        println!();
    }

    Ok(())
}

/// Event handler that signals when a specific job completes.
struct CompletionWatcher {
    target: JobKey,
    completed: Arc<tokio::sync::Notify>,
}

#[async_trait::async_trait]
impl EventHandler for CompletionWatcher {
    async fn handle(&self, event: &Event) {
        if let Event::JobCompleted { job_key, .. } = event
            && *job_key == self.target
        {
            self.completed.notify_one();
        }
    }
}

/// Fire a job once and wait for it to complete.
async fn trigger_job<S: Storage + 'static>(
    config: &CadenceConfig,
    store: JobStore<S>,
    job: JobKey,
) -> Result<(), Box<dyn std::error::Error>> {
    if !store.check_job_exists(&job).await? {
        error!("Job '{}' not found", job);
        let available = store.job_keys(&GroupMatcher::any_group()).await?;
        error!(
            "Available jobs: {}",
            available
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Err(format!("Job '{}' not found", job).into());
    }

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    // Create completion watcher before starting the scheduler
    let completed = Arc::new(tokio::sync::Notify::new());
    event_bus
        .register(Arc::new(CompletionWatcher {
            target: job.clone(),
            completed: completed.clone(),
        }))
        .await;

    let scheduler = ConfigBuilder::build_scheduler(&config.scheduler, store, event_bus);
    let (handle, _scheduler_task, _) = scheduler.start().await?;

    info!("Triggering job '{}'...", job);
    match handle.trigger_job(job.clone()).await {
        Ok(trigger_key) => {
            info!("Job triggered (trigger: {})", trigger_key);

            // Wait for completion with a timeout
            tokio::select! {
                _ = completed.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(300)) => {
                    warn!("Job timed out after 5 minutes");
                }
            }
        }
        Err(e) => {
            error!("Failed to trigger job: {}", e);
            handle.shutdown().await?;
            return Err(e.into());
        }
    }

    handle.shutdown().await?;
    info!("Done!");
    Ok(())
}
