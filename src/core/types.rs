//! Identity types for jobs and triggers.
//!
//! Jobs and triggers are addressed by a `(name, group)` pair. Triggers refer
//! to their job by key only, never by pointer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Group used when a key is created without an explicit group.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Identity of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    name: String,
    group: String,
}

/// Identity of a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    name: String,
    group: String,
}

impl JobKey {
    /// Create a new job key.
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Create a job key in the default group.
    pub fn with_default_group(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }

    /// Get the job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the job group.
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl From<&str> for JobKey {
    fn from(s: &str) -> Self {
        parse_key(s, |name, group| Self::new(name, group))
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

impl TriggerKey {
    /// Create a new trigger key.
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Create a trigger key in the default group.
    pub fn with_default_group(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }

    /// Get the trigger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the trigger group.
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl From<&str> for TriggerKey {
    fn from(s: &str) -> Self {
        parse_key(s, |name, group| Self::new(name, group))
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Parse `group.name`; a bare name lands in the default group.
fn parse_key<K>(s: &str, build: impl FnOnce(&str, &str) -> K) -> K {
    match s.split_once('.') {
        Some((group, name)) if !group.is_empty() && !name.is_empty() => build(name, group),
        _ => build(s, DEFAULT_GROUP),
    }
}
