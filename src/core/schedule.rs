//! Schedule kinds and fire time calculation.
//!
//! Every trigger carries exactly one [`ScheduleKind`]. The variant decides how
//! successive fire times are produced and which misfire instructions apply:
//!
//! - [`CronSchedule`]: a cron expression evaluated in a timezone. Both the
//!   5-field form and the 6/7-field form with seconds are accepted; `?` is
//!   treated as `*`.
//! - [`SimpleSchedule`]: a fixed interval repeated a number of times (or
//!   forever) from the trigger's start time.
//! - [`CalendarIntervalSchedule`]: every N seconds/minutes/hours/days/weeks/
//!   months/years, with day/month/year steps done on the local calendar.
//! - [`DailyTimeIntervalSchedule`]: every N seconds/minutes/hours inside a
//!   daily time-of-day window, optionally restricted to some weekdays.

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use cron::Schedule as CronExpression;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::trigger::MisfireInstruction;

/// Upper bound on iterations when stepping through calendar-based schedules.
const MAX_STEP_ITERATIONS: usize = 10_000;

/// Errors that can occur when validating schedules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Invalid daily time window.
    #[error("invalid time of day window: {0}")]
    InvalidTimeOfDay(String),

    /// The misfire instruction does not apply to this schedule kind.
    #[error("misfire instruction {instruction:?} is not valid for {kind} schedules")]
    UnsupportedMisfireInstruction {
        instruction: MisfireInstruction,
        kind: &'static str,
    },

    /// The end time precedes the start time.
    #[error("end time {end} is before start time {start}")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

pub(crate) fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

fn tz_or_utc(name: &str) -> Tz {
    name.parse().unwrap_or(Tz::UTC)
}

/// Map a local wall-clock time to UTC.
///
/// Ambiguous times resolve to the earlier instant. Times inside a DST gap
/// return `None` unless `shift_gap` is set, in which case they move forward
/// by one hour.
pub(crate) fn resolve_local(
    tz: &Tz,
    naive: NaiveDateTime,
    shift_gap: bool,
) -> Option<DateTime<Utc>> {
    if let Some(t) = tz.from_local_datetime(&naive).earliest() {
        return Some(t.with_timezone(&Utc));
    }
    if !shift_gap {
        return None;
    }
    let shifted = naive.checked_add_signed(TimeDelta::hours(1))?;
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

fn past_end(time: DateTime<Utc>, end: Option<DateTime<Utc>>) -> bool {
    end.is_some_and(|e| time > e)
}

/// Unit of a calendar or daily interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    /// Length of one unit when it is a fixed duration.
    fn fixed_seconds(self) -> Option<i64> {
        match self {
            IntervalUnit::Second => Some(1),
            IntervalUnit::Minute => Some(60),
            IntervalUnit::Hour => Some(3_600),
            IntervalUnit::Day => Some(86_400),
            IntervalUnit::Week => Some(604_800),
            IntervalUnit::Month | IntervalUnit::Year => None,
        }
    }
}

/// Cron expression evaluated in a timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronSchedule {
    expression: String,
    #[serde(default = "utc")]
    timezone: String,
}

fn utc() -> String {
    "UTC".to_string()
}

impl CronSchedule {
    /// Create a cron schedule in UTC.
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        let schedule = Self {
            expression: expression.into(),
            timezone: utc(),
        };
        schedule.parse()?;
        Ok(schedule)
    }

    /// Evaluate the expression in another timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Result<Self, ScheduleError> {
        let timezone = timezone.into();
        parse_timezone(&timezone)?;
        self.timezone = timezone;
        Ok(self)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    fn parse(&self) -> Result<CronExpression, ScheduleError> {
        let normalized = self.expression.trim().replace('?', "*");
        let fields = normalized.split_whitespace().count();
        let expression = match fields {
            5 => format!("0 {}", normalized),
            6 | 7 => normalized,
            n => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 5 to 7 fields, got {}",
                    n
                )));
            }
        };
        CronExpression::from_str(&expression)
            .map_err(|e| ScheduleError::InvalidCron(format!("{}: {}", self.expression, e)))
    }

    fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let expression = self.parse().ok()?;
        let tz = tz_or_utc(&self.timezone);
        let from = if after < start {
            start - TimeDelta::seconds(1)
        } else {
            after
        };
        let next = expression
            .after(&from.with_timezone(&tz))
            .next()
            .map(|t| t.with_timezone(&Utc))?;
        if past_end(next, end) { None } else { Some(next) }
    }
}

/// Fixed interval repeated from the start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleSchedule {
    #[serde(with = "duration_ms")]
    repeat_interval: Duration,
    /// Number of repeats after the first firing; `None` repeats forever.
    #[serde(default)]
    repeat_count: Option<u32>,
    #[serde(default)]
    times_triggered: u32,
}

impl SimpleSchedule {
    /// Fire `repeat_count + 1` times, `interval` apart.
    pub fn new(repeat_interval: Duration, repeat_count: u32) -> Self {
        Self {
            repeat_interval,
            repeat_count: Some(repeat_count),
            times_triggered: 0,
        }
    }

    /// Fire every `interval` with no end.
    pub fn repeat_forever(repeat_interval: Duration) -> Self {
        Self {
            repeat_interval,
            repeat_count: None,
            times_triggered: 0,
        }
    }

    /// Fire exactly once, at the start time.
    pub fn once() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    pub fn repeat_interval(&self) -> Duration {
        self.repeat_interval
    }

    pub fn repeat_count(&self) -> Option<u32> {
        self.repeat_count
    }

    pub fn times_triggered(&self) -> u32 {
        self.times_triggered
    }

    pub(crate) fn set_repeat_count(&mut self, repeat_count: Option<u32>) {
        self.repeat_count = repeat_count;
    }

    pub(crate) fn set_times_triggered(&mut self, times_triggered: u32) {
        self.times_triggered = times_triggered;
    }

    fn interval_ms(&self) -> i64 {
        i64::try_from(self.repeat_interval.as_millis()).unwrap_or(i64::MAX)
    }

    fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if let Some(count) = self.repeat_count {
            if self.times_triggered > count {
                return None;
            }
            if count == 0 && after >= start {
                return None;
            }
        }
        if end.is_some_and(|e| e <= after) {
            return None;
        }
        if after < start {
            return Some(start);
        }

        let interval = self.interval_ms();
        if interval <= 0 {
            return None;
        }
        let executed = (after - start).num_milliseconds() / interval + 1;
        if self.repeat_count.is_some_and(|count| executed > i64::from(count)) {
            return None;
        }
        let next = start.checked_add_signed(TimeDelta::milliseconds(executed.checked_mul(interval)?))?;
        if end.is_some_and(|e| e <= next) {
            return None;
        }
        Some(next)
    }

    /// Number of fire times in `[from, to)`.
    fn fires_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
        let interval = self.interval_ms();
        if interval <= 0 || to <= from {
            return 0;
        }
        u32::try_from((to - from).num_milliseconds() / interval).unwrap_or(u32::MAX)
    }
}

/// Calendar-aware repeating interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarIntervalSchedule {
    interval: u32,
    unit: IntervalUnit,
    #[serde(default = "utc")]
    timezone: String,
    #[serde(default)]
    preserve_hour_of_day_across_daylight_savings: bool,
    #[serde(default)]
    skip_day_if_hour_does_not_exist: bool,
    #[serde(default)]
    times_triggered: u32,
}

impl CalendarIntervalSchedule {
    pub fn new(interval: u32, unit: IntervalUnit) -> Self {
        Self {
            interval,
            unit,
            timezone: utc(),
            preserve_hour_of_day_across_daylight_savings: false,
            skip_day_if_hour_does_not_exist: false,
            times_triggered: 0,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Result<Self, ScheduleError> {
        let timezone = timezone.into();
        parse_timezone(&timezone)?;
        self.timezone = timezone;
        Ok(self)
    }

    /// Keep the local hour of day stable across DST transitions for day and
    /// week units.
    pub fn preserve_hour_of_day_across_daylight_savings(mut self, preserve: bool) -> Self {
        self.preserve_hour_of_day_across_daylight_savings = preserve;
        self
    }

    /// Skip a day whose local fire hour falls into a DST gap instead of
    /// shifting it forward.
    pub fn skip_day_if_hour_does_not_exist(mut self, skip: bool) -> Self {
        self.skip_day_if_hour_does_not_exist = skip;
        self
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn times_triggered(&self) -> u32 {
        self.times_triggered
    }

    fn uses_local_calendar(&self) -> bool {
        match self.unit {
            IntervalUnit::Month | IntervalUnit::Year => true,
            IntervalUnit::Day | IntervalUnit::Week => {
                self.preserve_hour_of_day_across_daylight_savings
            }
            _ => false,
        }
    }

    fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if end.is_some_and(|e| after >= e) || self.interval == 0 {
            return None;
        }
        if after < start {
            return Some(start);
        }

        let next = if self.uses_local_calendar() {
            self.local_step_after(after, start)?
        } else {
            let seconds = self.unit.fixed_seconds()?;
            let step = seconds.checked_mul(1000 * i64::from(self.interval))?;
            let steps = (after - start).num_milliseconds() / step + 1;
            start.checked_add_signed(TimeDelta::milliseconds(steps.checked_mul(step)?))?
        };

        if past_end(next, end) { None } else { Some(next) }
    }

    fn local_step_after(&self, after: DateTime<Utc>, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let tz = tz_or_utc(&self.timezone);
        let start_local = start.with_timezone(&tz).naive_local();
        let after_local = after.with_timezone(&tz).naive_local();

        let elapsed_units = match self.unit {
            IntervalUnit::Day => (after - start).num_days(),
            IntervalUnit::Week => (after - start).num_weeks(),
            IntervalUnit::Month => months_between(start_local, after_local),
            IntervalUnit::Year => i64::from(after_local.year() - start_local.year()),
            _ => 0,
        };
        let interval = i64::from(self.interval);
        let mut step = (elapsed_units / interval - 1).max(0);

        for _ in 0..MAX_STEP_ITERATIONS {
            let units = u64::try_from(step.checked_mul(interval)?).ok()?;
            step += 1;
            let local = add_units(start_local, self.unit, units)?;
            let candidate = match resolve_local(&tz, local, false) {
                Some(t) => t,
                None if self.skip_day_if_hour_does_not_exist => continue,
                None => resolve_local(&tz, local, true)?,
            };
            if candidate > after {
                return Some(candidate);
            }
        }
        None
    }
}

fn months_between(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month())
}

fn add_units(base: NaiveDateTime, unit: IntervalUnit, units: u64) -> Option<NaiveDateTime> {
    match unit {
        IntervalUnit::Day => base.checked_add_days(Days::new(units)),
        IntervalUnit::Week => base.checked_add_days(Days::new(units.checked_mul(7)?)),
        IntervalUnit::Month => base.checked_add_months(Months::new(u32::try_from(units).ok()?)),
        IntervalUnit::Year => {
            base.checked_add_months(Months::new(u32::try_from(units.checked_mul(12)?).ok()?))
        }
        fixed => {
            let seconds = i64::try_from(units).ok()?.checked_mul(fixed.fixed_seconds()?)?;
            base.checked_add_signed(TimeDelta::seconds(seconds))
        }
    }
}

/// Repeating interval inside a daily time-of-day window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTimeIntervalSchedule {
    interval: u32,
    unit: IntervalUnit,
    start_time_of_day: NaiveTime,
    end_time_of_day: NaiveTime,
    /// Empty means every day.
    #[serde(default)]
    days_of_week: Vec<Weekday>,
    #[serde(default)]
    repeat_count: Option<u32>,
    #[serde(default = "utc")]
    timezone: String,
    #[serde(default)]
    times_triggered: u32,
}

impl DailyTimeIntervalSchedule {
    /// Fire every `interval` `unit`s between two times of day, every day.
    pub fn new(
        interval: u32,
        unit: IntervalUnit,
        start_time_of_day: NaiveTime,
        end_time_of_day: NaiveTime,
    ) -> Self {
        Self {
            interval,
            unit,
            start_time_of_day,
            end_time_of_day,
            days_of_week: Vec::new(),
            repeat_count: None,
            timezone: utc(),
            times_triggered: 0,
        }
    }

    /// Restrict firing to the given weekdays.
    pub fn on_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.days_of_week = days.into_iter().collect();
        self
    }

    /// Stop after `repeat_count + 1` firings.
    pub fn with_repeat_count(mut self, repeat_count: u32) -> Self {
        self.repeat_count = Some(repeat_count);
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Result<Self, ScheduleError> {
        let timezone = timezone.into();
        parse_timezone(&timezone)?;
        self.timezone = timezone;
        Ok(self)
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    pub fn start_time_of_day(&self) -> NaiveTime {
        self.start_time_of_day
    }

    pub fn end_time_of_day(&self) -> NaiveTime {
        self.end_time_of_day
    }

    pub fn days_of_week(&self) -> &[Weekday] {
        &self.days_of_week
    }

    pub fn repeat_count(&self) -> Option<u32> {
        self.repeat_count
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn times_triggered(&self) -> u32 {
        self.times_triggered
    }

    fn fires_on(&self, day: Weekday) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&day)
    }

    fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if self
            .repeat_count
            .is_some_and(|count| self.times_triggered > count)
        {
            return None;
        }
        let step = TimeDelta::seconds(self.unit.fixed_seconds()? * i64::from(self.interval));
        if step <= TimeDelta::zero() {
            return None;
        }
        let after = if after < start {
            start - TimeDelta::seconds(1)
        } else {
            after
        };

        let tz = tz_or_utc(&self.timezone);
        let mut date = after.with_timezone(&tz).date_naive();
        // Two weeks covers any weekday restriction.
        for _ in 0..15 {
            if self.fires_on(date.weekday()) {
                let window_start = resolve_local(&tz, date.and_time(self.start_time_of_day), true);
                let window_end = resolve_local(&tz, date.and_time(self.end_time_of_day), true);
                if let (Some(window_start), Some(window_end)) = (window_start, window_end) {
                    let candidate = if after < window_start {
                        Some(window_start)
                    } else {
                        let steps = (after - window_start).num_seconds() / step.num_seconds() + 1;
                        window_start.checked_add_signed(step * i32::try_from(steps).ok()?)
                    };
                    if let Some(candidate) = candidate.filter(|c| *c <= window_end) {
                        return if past_end(candidate, end) {
                            None
                        } else {
                            Some(candidate)
                        };
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

/// The schedule carried by a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron(CronSchedule),
    Simple(SimpleSchedule),
    CalendarInterval(CalendarIntervalSchedule),
    DailyTimeInterval(DailyTimeIntervalSchedule),
}

impl From<CronSchedule> for ScheduleKind {
    fn from(schedule: CronSchedule) -> Self {
        ScheduleKind::Cron(schedule)
    }
}

impl From<SimpleSchedule> for ScheduleKind {
    fn from(schedule: SimpleSchedule) -> Self {
        ScheduleKind::Simple(schedule)
    }
}

impl From<CalendarIntervalSchedule> for ScheduleKind {
    fn from(schedule: CalendarIntervalSchedule) -> Self {
        ScheduleKind::CalendarInterval(schedule)
    }
}

impl From<DailyTimeIntervalSchedule> for ScheduleKind {
    fn from(schedule: DailyTimeIntervalSchedule) -> Self {
        ScheduleKind::DailyTimeInterval(schedule)
    }
}

impl ScheduleKind {
    /// Short name of the variant.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ScheduleKind::Cron(_) => "cron",
            ScheduleKind::Simple(_) => "simple",
            ScheduleKind::CalendarInterval(_) => "calendar_interval",
            ScheduleKind::DailyTimeInterval(_) => "daily_time_interval",
        }
    }

    /// Check the schedule parameters.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            ScheduleKind::Cron(s) => {
                parse_timezone(&s.timezone)?;
                s.parse().map(|_| ())
            }
            ScheduleKind::Simple(s) => {
                if s.repeat_count != Some(0) && s.repeat_interval.is_zero() {
                    return Err(ScheduleError::InvalidInterval(
                        "repeat interval must be positive when repeating".into(),
                    ));
                }
                Ok(())
            }
            ScheduleKind::CalendarInterval(s) => {
                parse_timezone(&s.timezone)?;
                if s.interval == 0 {
                    return Err(ScheduleError::InvalidInterval(
                        "calendar interval must be at least 1".into(),
                    ));
                }
                Ok(())
            }
            ScheduleKind::DailyTimeInterval(s) => {
                parse_timezone(&s.timezone)?;
                if s.interval == 0 {
                    return Err(ScheduleError::InvalidInterval(
                        "daily interval must be at least 1".into(),
                    ));
                }
                if !matches!(
                    s.unit,
                    IntervalUnit::Second | IntervalUnit::Minute | IntervalUnit::Hour
                ) {
                    return Err(ScheduleError::InvalidInterval(format!(
                        "daily intervals use seconds, minutes or hours, not {:?}",
                        s.unit
                    )));
                }
                if s.end_time_of_day < s.start_time_of_day {
                    return Err(ScheduleError::InvalidTimeOfDay(format!(
                        "{} ends before it starts at {}",
                        s.end_time_of_day, s.start_time_of_day
                    )));
                }
                Ok(())
            }
        }
    }

    /// First fire time strictly after `after`, within `[start, end]`.
    pub fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self {
            ScheduleKind::Cron(s) => s.fire_time_after(after, start, end),
            ScheduleKind::Simple(s) => s.fire_time_after(after, start, end),
            ScheduleKind::CalendarInterval(s) => s.fire_time_after(after, start, end),
            ScheduleKind::DailyTimeInterval(s) => s.fire_time_after(after, start, end),
        }
    }

    /// How many times the trigger has fired; cron schedules do not count.
    pub fn times_triggered(&self) -> u32 {
        match self {
            ScheduleKind::Cron(_) => 0,
            ScheduleKind::Simple(s) => s.times_triggered,
            ScheduleKind::CalendarInterval(s) => s.times_triggered,
            ScheduleKind::DailyTimeInterval(s) => s.times_triggered,
        }
    }

    pub(crate) fn record_fire(&mut self) {
        match self {
            ScheduleKind::Cron(_) => {}
            ScheduleKind::Simple(s) => s.times_triggered = s.times_triggered.saturating_add(1),
            ScheduleKind::CalendarInterval(s) => {
                s.times_triggered = s.times_triggered.saturating_add(1)
            }
            ScheduleKind::DailyTimeInterval(s) => {
                s.times_triggered = s.times_triggered.saturating_add(1)
            }
        }
    }

    /// Number of fire times in `[from, to)`; only simple schedules count.
    pub(crate) fn fires_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
        match self {
            ScheduleKind::Simple(s) => s.fires_between(from, to),
            _ => 0,
        }
    }

    /// Whether a misfire instruction applies to this kind.
    pub fn supports_misfire_instruction(&self, instruction: MisfireInstruction) -> bool {
        use MisfireInstruction::*;
        match (self, instruction) {
            (_, Smart | IgnoreMisfirePolicy | FireNow) => true,
            (ScheduleKind::Simple(_), DoNothing) => false,
            (ScheduleKind::Simple(_), _) => true,
            (_, DoNothing) => true,
            _ => false,
        }
    }

    /// What `Smart` means for this kind.
    pub fn smart_misfire_instruction(&self) -> MisfireInstruction {
        match self {
            ScheduleKind::Simple(s) => match s.repeat_count {
                Some(0) => MisfireInstruction::FireNow,
                None => MisfireInstruction::RescheduleNextWithRemainingCount,
                Some(_) => MisfireInstruction::RescheduleNowWithExistingRepeatCount,
            },
            _ => MisfireInstruction::FireNow,
        }
    }
}

/// Serialize a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
