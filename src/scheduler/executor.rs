//! Job execution.
//!
//! The scheduler hands every fire bundle to a [`JobExecutor`]. The store
//! never sees how work is performed; it only gets the job's data map back
//! and a completion instruction derived from the result.
//!
//! [`CommandExecutor`] runs an external program described by the job's
//! merged data map:
//!
//! | key           | type              | meaning                        |
//! |---------------|-------------------|--------------------------------|
//! | `command`     | string            | program to run (required)      |
//! | `args`        | list of strings   | arguments                      |
//! | `env`         | map of strings    | extra environment variables    |
//! | `working_dir` | string            | working directory              |
//! | `timeout_ms`  | integer           | kill the program after this    |
//!
//! Stdout, stderr and the exit code are written back into the job's data
//! map under `stdout`, `stderr` and `exit_code`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::job::{Job, JobDataMap, JobExecutionError};
use crate::core::trigger::Trigger;
use crate::jobstore::TriggerFiredBundle;

/// What an executor sees of one firing.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    job: Job,
    trigger: Trigger,
    recovering: bool,
    fire_time: DateTime<Utc>,
    scheduled_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    merged_data: JobDataMap,
}

impl JobExecutionContext {
    /// Build the context for a fired trigger.
    ///
    /// Trigger data overrides job data in the merged map.
    pub fn new(bundle: TriggerFiredBundle) -> Self {
        let mut merged_data = bundle.job.job_data().clone();
        merged_data.extend(
            bundle
                .trigger
                .job_data()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Self {
            job: bundle.job,
            trigger: bundle.trigger,
            recovering: bundle.recovering,
            fire_time: bundle.fire_time,
            scheduled_fire_time: bundle.scheduled_fire_time,
            previous_fire_time: bundle.previous_fire_time,
            next_fire_time: bundle.next_fire_time,
            merged_data,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn fire_instance_id(&self) -> Option<&str> {
        self.trigger.fire_instance_id()
    }

    /// Whether this firing re-runs an execution interrupted by a crash.
    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    pub fn scheduled_fire_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    /// Job data overlaid with trigger data.
    pub fn merged_data(&self) -> &JobDataMap {
        &self.merged_data
    }

    /// Get a typed value from the merged data map.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.merged_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Write a value into the job's data map.
    ///
    /// It is stored back only for jobs that persist data after execution.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.merged_data.insert(key.clone(), value.clone());
        self.job.job_data_mut().insert(key, value);
    }
}

/// Runs the work behind a fired trigger.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Execute one firing.
    async fn execute(&self, ctx: &mut JobExecutionContext) -> Result<(), JobExecutionError>;
}

/// Executor that runs an external command taken from the job data map.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    default_timeout: Option<Duration>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout applied when the job data sets none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    fn build_command(ctx: &JobExecutionContext) -> Result<Command, JobExecutionError> {
        let program: String = ctx.get("command").ok_or_else(|| {
            JobExecutionError::new(format!(
                "job {} has no `command` in its data map",
                ctx.job().key()
            ))
        })?;

        let mut cmd = Command::new(program);
        if let Some(args) = ctx.get::<Vec<String>>("args") {
            cmd.args(args);
        }
        if let Some(env) = ctx.get::<HashMap<String, String>>("env") {
            cmd.envs(env);
        }
        if let Some(dir) = ctx.get::<String>("working_dir") {
            cmd.current_dir(dir);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl JobExecutor for CommandExecutor {
    async fn execute(&self, ctx: &mut JobExecutionContext) -> Result<(), JobExecutionError> {
        let mut cmd = Self::build_command(ctx)?;
        let limit = ctx
            .get::<u64>("timeout_ms")
            .map(Duration::from_millis)
            .or(self.default_timeout);

        let output = match limit {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| {
                    JobExecutionError::new(format!("command timed out after {:?}", duration))
                })?
                .map_err(|e| JobExecutionError::new(e.to_string()))?,
            None => cmd
                .output()
                .await
                .map_err(|e| JobExecutionError::new(e.to_string()))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);
        ctx.put("stdout", stdout);
        ctx.put("stderr", stderr.clone());
        ctx.put("exit_code", code);

        if output.status.success() {
            Ok(())
        } else {
            Err(JobExecutionError::new(format!(
                "command exited with code {}: {}",
                code,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schedule::SimpleSchedule;
    use crate::core::types::{JobKey, TriggerKey};
    use serde_json::json;

    fn context(job: Job) -> JobExecutionContext {
        let trigger = Trigger::new(
            TriggerKey::new("t", "g"),
            job.key().clone(),
            SimpleSchedule::once(),
        )
        .with_data("source", "trigger");
        JobExecutionContext::new(TriggerFiredBundle {
            job,
            trigger,
            calendar: None,
            recovering: false,
            fire_time: Utc::now(),
            scheduled_fire_time: None,
            previous_fire_time: None,
            next_fire_time: None,
        })
    }

    #[test]
    fn test_trigger_data_overrides_job_data() {
        let ctx = context(
            Job::new(JobKey::new("j", "g"))
                .with_data("source", "job")
                .with_data("only_job", true),
        );
        assert_eq!(ctx.get::<String>("source"), Some("trigger".to_string()));
        assert_eq!(ctx.get::<bool>("only_job"), Some(true));
    }

    #[test]
    fn test_put_writes_job_data() {
        let mut ctx = context(Job::new(JobKey::new("j", "g")));
        ctx.put("count", 3);
        assert_eq!(ctx.get::<i64>("count"), Some(3));
        assert_eq!(ctx.job().get_data::<i64>("count"), Some(3));
    }

    #[tokio::test]
    async fn test_command_executor_captures_output() {
        let mut ctx = context(
            Job::new(JobKey::new("j", "g"))
                .with_data("command", "echo")
                .with_data("args", json!(["hello", "world"])),
        );
        CommandExecutor::new().execute(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.job().get_data::<String>("stdout"),
            Some("hello world\n".to_string())
        );
        assert_eq!(ctx.job().get_data::<i32>("exit_code"), Some(0));
    }

    #[tokio::test]
    async fn test_command_executor_reports_failure() {
        let mut ctx = context(
            Job::new(JobKey::new("j", "g"))
                .with_data("command", "sh")
                .with_data("args", json!(["-c", "echo oops >&2; exit 3"])),
        );
        let err = CommandExecutor::new().execute(&mut ctx).await.unwrap_err();
        assert!(err.message().contains("code 3"));
        assert!(err.message().contains("oops"));
        assert_eq!(ctx.job().get_data::<i32>("exit_code"), Some(3));
    }

    #[tokio::test]
    async fn test_command_executor_timeout() {
        let mut ctx = context(
            Job::new(JobKey::new("j", "g"))
                .with_data("command", "sleep")
                .with_data("args", json!(["5"]))
                .with_data("timeout_ms", 50),
        );
        let err = CommandExecutor::new().execute(&mut ctx).await.unwrap_err();
        assert!(err.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_command_is_an_error() {
        let mut ctx = context(Job::new(JobKey::new("j", "g")));
        let err = CommandExecutor::new().execute(&mut ctx).await.unwrap_err();
        assert!(err.message().contains("command"));
    }
}
