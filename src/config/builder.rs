//! Scheduling objects from YAML configuration.
//!
//! This module converts configuration into calendars, jobs and triggers and
//! loads them into a job store.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::calendar::Calendar;
use crate::core::job::{Job, JobDataMap};
use crate::core::schedule::{
    CalendarIntervalSchedule, CronSchedule, DailyTimeIntervalSchedule, ScheduleKind, SimpleSchedule,
};
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};
use crate::events::EventBus;
use crate::jobstore::JobStore;
use crate::scheduler::Scheduler;
use crate::storage::Storage;

use super::error::ConfigError;
use super::types::{
    CadenceConfig, CalendarConfig, JobConfig, ScheduleConfig, SchedulerConfig, TriggerConfig,
};

/// Builder for creating scheduling objects from configuration.
pub struct ConfigBuilder;

impl ConfigBuilder {
    /// Build a calendar from its configuration.
    pub fn build_calendar(config: &CalendarConfig) -> Result<Calendar, ConfigError> {
        let mut calendar = Calendar::new().exclude_dates(config.excluded_dates.iter().copied());
        for weekday in &config.excluded_weekdays {
            calendar = calendar.exclude_weekday(*weekday);
        }
        if let Some(description) = &config.description {
            calendar = calendar.with_description(description);
        }
        if let Some(tz) = &config.timezone {
            calendar = calendar.with_timezone(tz).map_err(|e| {
                ConfigError::InvalidConfig(format!("calendar '{}': {}", config.name, e))
            })?;
        }
        Ok(calendar)
    }

    /// Build a job (without its triggers).
    pub fn build_job(config: &JobConfig) -> Result<Job, ConfigError> {
        let mut job = Job::new(JobKey::new(&config.name, &config.group))
            .with_durability(config.durable)
            .with_concurrent_execution_disallowed(config.concurrent_execution_disallowed)
            .with_persist_job_data_after_execution(config.persist_job_data_after_execution)
            .with_requests_recovery(config.requests_recovery)
            .with_job_data(Self::convert_data(&config.data)?);
        if let Some(description) = &config.description {
            job = job.with_description(description);
        }
        Ok(job)
    }

    /// Build a trigger for `job_key`. Triggers without `start_at` start at `now`.
    pub fn build_trigger(
        config: &TriggerConfig,
        job_key: &JobKey,
        now: DateTime<Utc>,
    ) -> Result<Trigger, ConfigError> {
        let schedule = Self::build_schedule(&config.schedule).map_err(|e| {
            ConfigError::InvalidConfig(format!("trigger '{}': {}", config.key_string(), e))
        })?;

        let mut trigger = Trigger::new(
            TriggerKey::new(&config.name, &config.group),
            job_key.clone(),
            schedule,
        )
        .with_priority(config.priority)
        .with_misfire_instruction(config.misfire_instruction)
        .start_at(config.start_at.unwrap_or(now))
        .with_job_data(Self::convert_data(&config.data)?);

        if let Some(end) = config.end_at {
            trigger = trigger.end_at(end);
        }
        if let Some(calendar) = &config.calendar {
            trigger = trigger.with_calendar(calendar);
        }
        if let Some(description) = &config.description {
            trigger = trigger.with_description(description);
        }

        trigger.validate().map_err(|e| {
            ConfigError::InvalidConfig(format!("trigger '{}': {}", config.key_string(), e))
        })?;
        Ok(trigger)
    }

    /// Build a schedule from its configuration.
    pub fn build_schedule(
        config: &ScheduleConfig,
    ) -> Result<ScheduleKind, crate::core::schedule::ScheduleError> {
        let schedule: ScheduleKind = match config {
            ScheduleConfig::Cron {
                expression,
                timezone,
            } => {
                let cron = CronSchedule::new(expression)?;
                match timezone {
                    Some(tz) => cron.with_timezone(tz)?.into(),
                    None => cron.into(),
                }
            }
            ScheduleConfig::Simple {
                interval_ms,
                repeat_count,
            } => {
                let interval = Duration::from_millis(*interval_ms);
                match repeat_count {
                    Some(count) => SimpleSchedule::new(interval, *count).into(),
                    None => SimpleSchedule::repeat_forever(interval).into(),
                }
            }
            ScheduleConfig::CalendarInterval {
                interval,
                unit,
                timezone,
                preserve_hour_of_day_across_daylight_savings,
                skip_day_if_hour_does_not_exist,
            } => {
                let mut schedule = CalendarIntervalSchedule::new(*interval, *unit)
                    .preserve_hour_of_day_across_daylight_savings(
                        *preserve_hour_of_day_across_daylight_savings,
                    )
                    .skip_day_if_hour_does_not_exist(*skip_day_if_hour_does_not_exist);
                if let Some(tz) = timezone {
                    schedule = schedule.with_timezone(tz)?;
                }
                schedule.into()
            }
            ScheduleConfig::DailyTimeInterval {
                interval,
                unit,
                start_time,
                end_time,
                days,
                repeat_count,
                timezone,
            } => {
                let mut schedule =
                    DailyTimeIntervalSchedule::new(*interval, *unit, *start_time, *end_time);
                if !days.is_empty() {
                    schedule = schedule.on_days(days.iter().copied());
                }
                if let Some(count) = repeat_count {
                    schedule = schedule.with_repeat_count(*count);
                }
                if let Some(tz) = timezone {
                    schedule = schedule.with_timezone(tz)?;
                }
                schedule.into()
            }
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Build every job with its triggers.
    pub fn build_jobs(
        config: &CadenceConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Job, Vec<Trigger>)>, ConfigError> {
        config
            .jobs
            .iter()
            .map(|job_config| {
                let job = Self::build_job(job_config)?;
                let triggers = job_config
                    .triggers
                    .iter()
                    .map(|t| Self::build_trigger(t, job.key(), now))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((job, triggers))
            })
            .collect()
    }

    /// Load calendars, jobs and triggers into the store.
    ///
    /// With `replace`, existing records with the same keys are overwritten;
    /// otherwise any existing key fails the load.
    pub async fn apply<S: Storage>(
        config: &CadenceConfig,
        store: &JobStore<S>,
        replace: bool,
    ) -> Result<(), ConfigError> {
        for calendar_config in &config.calendars {
            let calendar = Self::build_calendar(calendar_config)?;
            store
                .store_calendar(&calendar_config.name, calendar, replace, true)
                .await?;
        }

        let jobs = Self::build_jobs(config, store.clock().now())?;
        let job_count = jobs.len();
        store.store_jobs_and_triggers(jobs, replace).await?;

        tracing::info!(
            calendars = config.calendars.len(),
            jobs = job_count,
            "Loaded configuration into job store"
        );
        Ok(())
    }

    /// Load only the calendars and jobs whose keys are not stored yet.
    ///
    /// Records already in a persistent store keep their schedule state
    /// across restarts. Returns the number of jobs added.
    pub async fn apply_new<S: Storage>(
        config: &CadenceConfig,
        store: &JobStore<S>,
    ) -> Result<usize, ConfigError> {
        for calendar_config in &config.calendars {
            if store.calendar_exists(&calendar_config.name).await? {
                tracing::debug!(calendar = %calendar_config.name, "Calendar already stored");
                continue;
            }
            let calendar = Self::build_calendar(calendar_config)?;
            store
                .store_calendar(&calendar_config.name, calendar, false, false)
                .await?;
        }

        let mut added = Vec::new();
        for (job, triggers) in Self::build_jobs(config, store.clock().now())? {
            if store.check_job_exists(job.key()).await? {
                tracing::debug!(job = %job.key(), "Job already stored");
                continue;
            }
            added.push((job, triggers));
        }
        let count = added.len();
        store.store_jobs_and_triggers(added, false).await?;

        tracing::info!(
            jobs = count,
            skipped = config.jobs.len() - count,
            "Loaded new jobs into job store"
        );
        Ok(count)
    }

    /// Create a job store over `storage` with the configured settings.
    pub fn build_job_store<S: Storage>(
        config: &SchedulerConfig,
        storage: Arc<S>,
    ) -> Result<JobStore<S>, ConfigError> {
        let store = JobStore::new(storage)
            .with_instance_name(&config.instance_name)
            .with_misfire_threshold(Duration::from_millis(config.misfire_threshold_ms))?;
        Ok(store)
    }

    /// Create a scheduler over `store` with the configured settings.
    pub fn build_scheduler<S: Storage + 'static>(
        config: &SchedulerConfig,
        store: JobStore<S>,
        event_bus: Arc<EventBus>,
    ) -> Scheduler<S> {
        let mut scheduler = Scheduler::with_event_bus(store, event_bus)
            .with_batch_size(config.batch_size)
            .with_time_window(Duration::from_millis(config.time_window_ms))
            .with_idle_wait(Duration::from_millis(config.idle_wait_ms))
            .with_shutdown_timeout(Duration::from_millis(config.shutdown_timeout_ms));
        if let Some(max) = config.max_concurrent_jobs {
            scheduler = scheduler.with_max_concurrent_jobs(max);
        }
        scheduler
    }

    /// Convert a YAML data map to a job data map.
    fn convert_data(data: &HashMap<String, serde_yaml::Value>) -> Result<JobDataMap, ConfigError> {
        data.iter()
            .map(|(key, value)| {
                let json_value = serde_json::to_value(value)
                    .map_err(|e| ConfigError::InvalidConfig(format!("data '{}': {}", key, e)))?;
                Ok((key.clone(), json_value))
            })
            .collect()
    }
}
