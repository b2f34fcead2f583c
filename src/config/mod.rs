//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the scheduler, its
//! storage, calendars and the jobs and triggers to load.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::ConfigBuilder;
pub use error::ConfigError;
pub use types::{
    CadenceConfig, CalendarConfig, JobConfig, ScheduleConfig, SchedulerConfig, StorageConfig,
    TriggerConfig,
};
pub use yaml::YamlLoader;
