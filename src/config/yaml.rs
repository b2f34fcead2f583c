//! YAML configuration parsing.
//!
//! Parses the scheduler configuration document and validates it before
//! anything reaches the job store.

use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;

use crate::core::types::JobKey;

use super::builder::ConfigBuilder;
use super::error::ConfigError;
use super::types::{CadenceConfig, StorageConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load and validate configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<CadenceConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CadenceConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<CadenceConfig, ConfigError> {
        let config: CadenceConfig = serde_yaml::from_str(yaml)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate a configuration document.
    pub fn validate(config: &CadenceConfig) -> Result<(), ConfigError> {
        Self::validate_scheduler(config)?;

        let mut calendar_names = HashSet::new();
        for calendar in &config.calendars {
            if calendar.name.is_empty() {
                return Err(ConfigError::MissingField("calendars[].name".into()));
            }
            if !calendar_names.insert(calendar.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate calendar: {}",
                    calendar.name
                )));
            }
            ConfigBuilder::build_calendar(calendar)?;
        }

        let now = Utc::now();
        let mut job_keys = HashSet::new();
        let mut trigger_keys = HashSet::new();
        for job in &config.jobs {
            if job.name.is_empty() {
                return Err(ConfigError::MissingField("jobs[].name".into()));
            }
            if job.group.is_empty() {
                return Err(ConfigError::MissingField(format!("group of job {}", job.name)));
            }
            if !job_keys.insert(job.key_string()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job: {}",
                    job.key_string()
                )));
            }
            if job.triggers.is_empty() && !job.durable {
                return Err(ConfigError::InvalidConfig(format!(
                    "job {} has no triggers and is not durable",
                    job.key_string()
                )));
            }

            let job_key = JobKey::new(&job.name, &job.group);
            for trigger in &job.triggers {
                if trigger.name.is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "name of a trigger of job {}",
                        job.key_string()
                    )));
                }
                if !trigger_keys.insert(trigger.key_string()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "duplicate trigger: {}",
                        trigger.key_string()
                    )));
                }
                if let Some(calendar) = &trigger.calendar
                    && !calendar_names.contains(calendar.as_str())
                {
                    return Err(ConfigError::InvalidConfig(format!(
                        "trigger {} references unknown calendar '{}'",
                        trigger.key_string(),
                        calendar
                    )));
                }
                ConfigBuilder::build_trigger(trigger, &job_key, now)?;
            }
        }

        Ok(())
    }

    fn validate_scheduler(config: &CadenceConfig) -> Result<(), ConfigError> {
        let scheduler = &config.scheduler;
        if scheduler.instance_name.is_empty() {
            return Err(ConfigError::MissingField("scheduler.instance_name".into()));
        }
        if scheduler.misfire_threshold_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.misfire_threshold_ms must be greater than 0".into(),
            ));
        }
        if scheduler.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.batch_size must be greater than 0".into(),
            ));
        }
        if scheduler.idle_wait_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.idle_wait_ms must be greater than 0".into(),
            ));
        }
        if scheduler.max_concurrent_jobs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "scheduler.max_concurrent_jobs must be greater than 0".into(),
            ));
        }
        if let StorageConfig::Sqlite { path } = &config.storage
            && path.is_empty()
        {
            return Err(ConfigError::MissingField("storage.path".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleConfig;
    use std::io::Write;

    fn job_with_trigger(trigger: &str) -> String {
        format!(
            r#"
jobs:
  - name: j
    triggers:
{}
"#,
            trigger
        )
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = YamlLoader::parse_config("{}").unwrap();
        assert_eq!(config.scheduler.instance_name, "cadence");
        assert_eq!(config.scheduler.misfire_threshold_ms, 5_000);
        assert_eq!(config.scheduler.batch_size, 1);
        assert_eq!(config.scheduler.time_window_ms, 0);
        assert_eq!(config.scheduler.idle_wait_ms, 1_000);
        assert_eq!(config.scheduler.max_concurrent_jobs, None);
        assert_eq!(config.scheduler.shutdown_timeout_ms, 30_000);
        assert_eq!(config.storage, StorageConfig::Memory);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_parse_scheduler_and_storage() {
        let yaml = r#"
scheduler:
  instance_name: main
  misfire_threshold_ms: 60000
  batch_size: 10
  time_window_ms: 500
  max_concurrent_jobs: 4
storage:
  type: sqlite
  path: /tmp/cadence.db
"#;
        let config = YamlLoader::parse_config(yaml).unwrap();
        assert_eq!(config.scheduler.instance_name, "main");
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.scheduler.max_concurrent_jobs, Some(4));
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: "/tmp/cadence.db".into()
            }
        );
    }

    #[test]
    fn test_parse_all_schedule_types() {
        let yaml = r#"
jobs:
  - name: j
    triggers:
      - name: cron
        schedule: { type: cron, expression: "0 0 * * * *" }
      - name: simple
        schedule: { type: simple, interval_ms: 1000 }
      - name: calendar
        schedule: { type: calendar_interval, interval: 2, unit: week }
      - name: daily
        schedule:
          type: daily_time_interval
          interval: 1
          unit: hour
          start_time: "08:00:00"
          end_time: "18:00:00"
          repeat_count: 20
"#;
        let config = YamlLoader::parse_config(yaml).unwrap();
        let triggers = &config.jobs[0].triggers;
        assert_eq!(triggers.len(), 4);
        assert!(matches!(triggers[0].schedule, ScheduleConfig::Cron { .. }));
        assert!(matches!(
            triggers[1].schedule,
            ScheduleConfig::Simple {
                interval_ms: 1000,
                repeat_count: None
            }
        ));
        assert!(matches!(
            triggers[2].schedule,
            ScheduleConfig::CalendarInterval { interval: 2, .. }
        ));
        assert!(matches!(
            triggers[3].schedule,
            ScheduleConfig::DailyTimeInterval {
                repeat_count: Some(20),
                ..
            }
        ));
    }

    #[test]
    fn test_validation_error_zero_misfire_threshold() {
        let result = YamlLoader::parse_config("scheduler:\n  misfire_threshold_ms: 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_validation_error_zero_batch_size() {
        let result = YamlLoader::parse_config("scheduler:\n  batch_size: 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_validation_error_duplicate_job() {
        let yaml = r#"
jobs:
  - name: j
    durable: true
  - name: j
    durable: true
"#;
        let err = YamlLoader::parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate job"));
    }

    #[test]
    fn test_validation_error_duplicate_trigger_across_jobs() {
        let yaml = r#"
jobs:
  - name: a
    triggers:
      - name: t
        schedule: { type: simple, interval_ms: 1000 }
  - name: b
    triggers:
      - name: t
        schedule: { type: simple, interval_ms: 1000 }
"#;
        let err = YamlLoader::parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate trigger"));
    }

    #[test]
    fn test_validation_error_unknown_calendar() {
        let yaml = job_with_trigger(
            r#"      - name: t
        calendar: nope
        schedule: { type: simple, interval_ms: 1000 }"#,
        );
        let err = YamlLoader::parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown calendar"));
    }

    #[test]
    fn test_validation_error_bad_cron() {
        let yaml = job_with_trigger(
            r#"      - name: t
        schedule: { type: cron, expression: "not a cron" }"#,
        );
        assert!(matches!(
            YamlLoader::parse_config(&yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_error_bad_timezone() {
        let yaml = job_with_trigger(
            r#"      - name: t
        schedule: { type: cron, expression: "0 0 * * * *", timezone: Mars/Olympus }"#,
        );
        assert!(matches!(
            YamlLoader::parse_config(&yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_error_daily_window_backwards() {
        let yaml = job_with_trigger(
            r#"      - name: t
        schedule:
          type: daily_time_interval
          interval: 1
          unit: hour
          start_time: "18:00:00"
          end_time: "08:00:00""#,
        );
        assert!(matches!(
            YamlLoader::parse_config(&yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_error_non_durable_job_without_triggers() {
        let err = YamlLoader::parse_config("jobs:\n  - name: lonely\n").unwrap_err();
        assert!(err.to_string().contains("not durable"));
    }

    #[test]
    fn test_validation_error_unknown_schedule_type() {
        let yaml = job_with_trigger(
            r#"      - name: t
        schedule: { type: hourly }"#,
        );
        assert!(matches!(
            YamlLoader::parse_config(&yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scheduler:\n  instance_name: from-file").unwrap();
        let config = YamlLoader::load_config(file.path()).unwrap();
        assert_eq!(config.scheduler.instance_name, "from-file");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = YamlLoader::load_config("/nonexistent/cadence.yaml");
        assert!(matches!(result, Err(ConfigError::FileReadError { .. })));
    }
}
