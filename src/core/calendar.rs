//! Exclusion calendars.
//!
//! A calendar names instants on which triggers bound to it must not fire.
//! Exclusion works on whole local days: a date listed explicitly, or any day
//! falling on an excluded weekday, in the calendar's timezone.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::schedule::{ScheduleError, parse_timezone, resolve_local};

/// A named exclusion rule, stored inside the scheduler record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default)]
    excluded_dates: BTreeSet<NaiveDate>,
    #[serde(default)]
    excluded_weekdays: Vec<Weekday>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for Calendar {
    fn default() -> Self {
        Self::new()
    }
}

impl Calendar {
    /// Create a calendar that excludes nothing.
    pub fn new() -> Self {
        Self {
            description: None,
            timezone: default_timezone(),
            excluded_dates: BTreeSet::new(),
            excluded_weekdays: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Interpret dates and weekdays in the given timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Result<Self, ScheduleError> {
        let timezone = timezone.into();
        parse_timezone(&timezone)?;
        self.timezone = timezone;
        Ok(self)
    }

    /// Exclude a single date.
    pub fn exclude_date(mut self, date: NaiveDate) -> Self {
        self.excluded_dates.insert(date);
        self
    }

    /// Exclude several dates.
    pub fn exclude_dates(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.excluded_dates.extend(dates);
        self
    }

    /// Exclude every occurrence of a weekday.
    pub fn exclude_weekday(mut self, weekday: Weekday) -> Self {
        if !self.excluded_weekdays.contains(&weekday) {
            self.excluded_weekdays.push(weekday);
        }
        self
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn excluded_dates(&self) -> &BTreeSet<NaiveDate> {
        &self.excluded_dates
    }

    pub fn excluded_weekdays(&self) -> &[Weekday] {
        &self.excluded_weekdays
    }

    /// Check the timezone is known.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        parse_timezone(&self.timezone).map(|_| ())
    }

    fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    /// Whether a local date is excluded.
    pub fn is_date_excluded(&self, date: NaiveDate) -> bool {
        self.excluded_dates.contains(&date) || self.excluded_weekdays.contains(&date.weekday())
    }

    /// Whether a trigger may fire at `time`.
    pub fn is_time_included(&self, time: DateTime<Utc>) -> bool {
        let local = time.with_timezone(&self.tz()).date_naive();
        !self.is_date_excluded(local)
    }

    /// The first included instant at or after `time`.
    ///
    /// Returns `None` when every weekday is excluded or no included day is
    /// found within a year.
    pub fn next_included_time(&self, time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_time_included(time) {
            return Some(time);
        }
        if self.excluded_weekdays.len() >= 7 {
            return None;
        }

        let tz = self.tz();
        let mut date = time.with_timezone(&tz).date_naive();
        for _ in 0..366 {
            date = date.succ_opt()?;
            if !self.is_date_excluded(date) {
                return resolve_local(&tz, date.and_hms_opt(0, 0, 0)?, true);
            }
        }
        None
    }
}
