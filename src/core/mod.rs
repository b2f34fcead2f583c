//! Entity model: keys, jobs, triggers, schedules, calendars and states.

pub mod calendar;
pub mod clock;
pub mod job;
pub mod matcher;
pub mod schedule;
pub mod state;
pub mod trigger;
pub mod types;
