//! Trigger definitions and fire time bookkeeping.
//!
//! A [`Trigger`] binds a [`ScheduleKind`] to a job by key. It owns its
//! previous/next fire times and knows how to advance them when fired, when
//! misfired, and when its calendar changes. Persistence and state live in
//! the job store.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::calendar::Calendar;
use super::job::{JobDataMap, JobExecutionError};
use super::schedule::{ScheduleError, ScheduleKind};
use super::types::{JobKey, TriggerKey};

/// Priority assigned when none is given.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Upper bound on candidate fire times examined while skipping calendar
/// exclusions.
const MAX_CALENDAR_SKIPS: usize = 10_000;

/// What to do when a trigger's fire time passed without it firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfireInstruction {
    /// Let the schedule kind pick its usual policy.
    #[default]
    Smart,
    /// Never treat the trigger as misfired; it fires late at its original times.
    IgnoreMisfirePolicy,
    /// Fire once immediately.
    FireNow,
    /// Skip the missed fire times and wait for the next regular one.
    DoNothing,
    /// Restart the repeat series now, keeping the configured repeat count.
    RescheduleNowWithExistingRepeatCount,
    /// Restart the repeat series now with only the repeats that were not missed.
    RescheduleNowWithRemainingRepeatCount,
    /// Wait for the next regular fire time, counting missed fire times as fired.
    RescheduleNextWithRemainingCount,
    /// Wait for the next regular fire time, keeping the repeat count.
    RescheduleNextWithExistingCount,
}

/// Outcome instruction applied to a trigger after its job ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedExecutionInstruction {
    NoInstruction,
    DeleteTrigger,
    SetTriggerComplete,
    SetTriggerError,
    SetAllJobTriggersComplete,
    SetAllJobTriggersError,
}

/// A schedule bound to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    key: TriggerKey,
    job_key: JobKey,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    calendar_name: Option<String>,
    #[serde(default)]
    job_data: JobDataMap,
    #[serde(default = "default_priority")]
    priority: i32,
    start_time: DateTime<Utc>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    next_fire_time: Option<DateTime<Utc>>,
    #[serde(default)]
    previous_fire_time: Option<DateTime<Utc>>,
    #[serde(default)]
    misfire_instruction: MisfireInstruction,
    #[serde(default)]
    fire_instance_id: Option<String>,
    schedule: ScheduleKind,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl Trigger {
    /// Create a trigger starting now.
    pub fn new(key: TriggerKey, job_key: JobKey, schedule: impl Into<ScheduleKind>) -> Self {
        Self {
            key,
            job_key,
            description: None,
            calendar_name: None,
            job_data: JobDataMap::new(),
            priority: DEFAULT_PRIORITY,
            start_time: Utc::now(),
            end_time: None,
            next_fire_time: None,
            previous_fire_time: None,
            misfire_instruction: MisfireInstruction::Smart,
            fire_instance_id: None,
            schedule: schedule.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Skip fire times excluded by the named calendar.
    pub fn with_calendar(mut self, calendar_name: impl Into<String>) -> Self {
        self.calendar_name = Some(calendar_name.into());
        self
    }

    /// Higher priority fires first when fire times tie.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_job_data(mut self, data: JobDataMap) -> Self {
        self.job_data = data;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.job_data.insert(key.into(), value.into());
        self
    }

    pub fn start_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn end_at(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    /// Set the next fire time directly, bypassing the schedule.
    pub fn with_next_fire_time(mut self, next_fire_time: Option<DateTime<Utc>>) -> Self {
        self.next_fire_time = next_fire_time;
        self
    }

    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn calendar_name(&self) -> Option<&str> {
        self.calendar_name.as_deref()
    }

    pub fn job_data(&self) -> &JobDataMap {
        &self.job_data
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn misfire_instruction(&self) -> MisfireInstruction {
        self.misfire_instruction
    }

    pub fn fire_instance_id(&self) -> Option<&str> {
        self.fire_instance_id.as_deref()
    }

    pub fn schedule(&self) -> &ScheduleKind {
        &self.schedule
    }

    pub fn set_next_fire_time(&mut self, next_fire_time: Option<DateTime<Utc>>) {
        self.next_fire_time = next_fire_time;
    }

    pub(crate) fn set_fire_instance_id(&mut self, id: String) {
        self.fire_instance_id = Some(id);
    }

    /// Check the schedule, bounds and misfire instruction.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        self.schedule.validate()?;
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(ScheduleError::EndBeforeStart {
                    start: self.start_time,
                    end,
                });
            }
        }
        if !self
            .schedule
            .supports_misfire_instruction(self.misfire_instruction)
        {
            return Err(ScheduleError::UnsupportedMisfireInstruction {
                instruction: self.misfire_instruction,
                kind: self.schedule.kind_name(),
            });
        }
        Ok(())
    }

    /// First fire time strictly after `after`, ignoring calendars.
    pub fn fire_time_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .fire_time_after(after, self.start_time, self.end_time)
    }

    /// Whether another firing is scheduled.
    pub fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    /// Compute and set the first fire time, skipping calendar exclusions.
    pub fn compute_first_fire_time(&mut self, calendar: Option<&Calendar>) -> Option<DateTime<Utc>> {
        let first = self.fire_time_after(self.start_time - TimeDelta::seconds(1));
        self.next_fire_time = self.skip_excluded(first, calendar);
        self.next_fire_time
    }

    /// Advance fire time bookkeeping for a firing.
    pub fn triggered(&mut self, calendar: Option<&Calendar>) {
        self.schedule.record_fire();
        self.previous_fire_time = self.next_fire_time;
        let next = self.next_fire_time.and_then(|t| self.fire_time_after(t));
        self.next_fire_time = self.skip_excluded(next, calendar);
    }

    /// Recompute the next fire time after a misfire, per the misfire
    /// instruction.
    pub fn update_after_misfire(&mut self, calendar: Option<&Calendar>, now: DateTime<Utc>) {
        let mut instruction = self.misfire_instruction;
        if instruction == MisfireInstruction::Smart {
            instruction = self.schedule.smart_misfire_instruction();
        }

        if instruction == MisfireInstruction::FireNow {
            if let ScheduleKind::Simple(simple) = &self.schedule {
                if simple.repeat_count() != Some(0) {
                    instruction = MisfireInstruction::RescheduleNowWithRemainingRepeatCount;
                }
            }
        }

        match instruction {
            MisfireInstruction::Smart | MisfireInstruction::IgnoreMisfirePolicy => {}
            MisfireInstruction::FireNow => {
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::DoNothing | MisfireInstruction::RescheduleNextWithExistingCount => {
                let next = self.fire_time_after(now);
                self.next_fire_time = self.skip_excluded(next, calendar);
            }
            MisfireInstruction::RescheduleNextWithRemainingCount => {
                let next = self.fire_time_after(now);
                let next = self.skip_excluded(next, calendar);
                if let (Some(missed_from), Some(new_time)) = (self.next_fire_time, next) {
                    let missed = self.schedule.fires_between(missed_from, new_time);
                    if let ScheduleKind::Simple(simple) = &mut self.schedule {
                        let fired = simple.times_triggered().saturating_add(missed);
                        simple.set_times_triggered(fired);
                    }
                }
                self.next_fire_time = next;
            }
            MisfireInstruction::RescheduleNowWithExistingRepeatCount => {
                if let ScheduleKind::Simple(simple) = &mut self.schedule {
                    if let Some(count) = simple.repeat_count() {
                        if count != 0 {
                            let remaining = count.saturating_sub(simple.times_triggered());
                            simple.set_repeat_count(Some(remaining));
                            simple.set_times_triggered(0);
                        }
                    }
                }
                self.restart_now(now);
            }
            MisfireInstruction::RescheduleNowWithRemainingRepeatCount => {
                let missed = match self.next_fire_time {
                    Some(missed_from) if missed_from < now => {
                        self.schedule.fires_between(missed_from, now)
                    }
                    _ => 0,
                };
                if let ScheduleKind::Simple(simple) = &mut self.schedule {
                    if let Some(count) = simple.repeat_count() {
                        let used = simple.times_triggered().saturating_add(missed);
                        simple.set_repeat_count(Some(count.saturating_sub(used)));
                        simple.set_times_triggered(0);
                    }
                }
                self.restart_now(now);
            }
        }
    }

    fn restart_now(&mut self, now: DateTime<Utc>) {
        if self.end_time.is_some_and(|end| end < now) {
            self.next_fire_time = None;
        } else {
            self.start_time = now;
            self.next_fire_time = Some(now);
        }
    }

    /// Recompute the next fire time against a replaced calendar.
    ///
    /// Fire times older than `misfire_threshold` are skipped rather than
    /// treated as due.
    pub fn update_with_new_calendar(
        &mut self,
        calendar: Option<&Calendar>,
        misfire_threshold: Duration,
        now: DateTime<Utc>,
    ) {
        let from = self
            .previous_fire_time
            .unwrap_or(self.start_time - TimeDelta::seconds(1));
        let threshold = TimeDelta::from_std(misfire_threshold).unwrap_or(TimeDelta::MAX);
        let mut next = self.fire_time_after(from);

        for _ in 0..MAX_CALENDAR_SKIPS {
            let Some(candidate) = next else {
                break;
            };
            let excluded = calendar.is_some_and(|c| !c.is_time_included(candidate));
            let stale = candidate < now && now - candidate >= threshold;
            if !excluded && !stale {
                break;
            }
            next = self.fire_time_after(candidate);
        }
        self.next_fire_time = next;
    }

    /// Derive the completion instruction from an execution result.
    pub fn execution_complete(
        &self,
        error: Option<&JobExecutionError>,
    ) -> CompletedExecutionInstruction {
        if let Some(error) = error {
            if error.should_unschedule_all_triggers() {
                return CompletedExecutionInstruction::SetAllJobTriggersComplete;
            }
            if error.should_unschedule_firing_trigger() {
                return CompletedExecutionInstruction::SetTriggerComplete;
            }
        }
        if self.may_fire_again() {
            CompletedExecutionInstruction::NoInstruction
        } else {
            CompletedExecutionInstruction::DeleteTrigger
        }
    }

    fn skip_excluded(
        &self,
        mut next: Option<DateTime<Utc>>,
        calendar: Option<&Calendar>,
    ) -> Option<DateTime<Utc>> {
        let Some(calendar) = calendar else {
            return next;
        };
        for _ in 0..MAX_CALENDAR_SKIPS {
            match next {
                Some(t) if !calendar.is_time_included(t) => next = self.fire_time_after(t),
                _ => return next,
            }
        }
        None
    }
}
