//! Trigger states and legal transitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Internal state of a stored trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Eligible for acquisition.
    Waiting,
    /// Reserved by an acquisition pass, awaiting firing.
    Acquired,
    Paused,
    PausedAndBlocked,
    /// The job has a non-concurrent execution in flight.
    Blocked,
    /// The schedule is exhausted.
    Complete,
    /// The executor signaled failure.
    Error,
}

impl TriggerState {
    /// State for a newly stored or re-stored trigger.
    pub fn initial(paused: bool, blocked: bool) -> Self {
        match (paused, blocked) {
            (true, true) => TriggerState::PausedAndBlocked,
            (true, false) => TriggerState::Paused,
            (false, true) => TriggerState::Blocked,
            (false, false) => TriggerState::Waiting,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TriggerState::Complete | TriggerState::Error)
    }

    pub fn is_paused(self) -> bool {
        matches!(self, TriggerState::Paused | TriggerState::PausedAndBlocked)
    }

    /// Target state when paused; `None` when pausing does not apply.
    pub fn paused(self) -> Option<Self> {
        match self {
            TriggerState::Waiting | TriggerState::Acquired => Some(TriggerState::Paused),
            TriggerState::Blocked => Some(TriggerState::PausedAndBlocked),
            _ => None,
        }
    }

    /// Target state when resumed, given whether the job is blocked.
    pub fn resumed(self, job_blocked: bool) -> Option<Self> {
        if !self.is_paused() {
            return None;
        }
        Some(if job_blocked {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        })
    }

    /// Target state when the job starts a non-concurrent execution.
    pub fn blocked(self) -> Option<Self> {
        match self {
            TriggerState::Waiting | TriggerState::Acquired => Some(TriggerState::Blocked),
            TriggerState::Paused => Some(TriggerState::PausedAndBlocked),
            _ => None,
        }
    }

    /// Target state when the job's non-concurrent execution ends.
    pub fn unblocked(self) -> Option<Self> {
        match self {
            TriggerState::Blocked => Some(TriggerState::Waiting),
            TriggerState::PausedAndBlocked => Some(TriggerState::Paused),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: TriggerState) -> bool {
        use TriggerState::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Complete | Error) => true,
            (Waiting, Acquired | Blocked | Paused) => true,
            (Acquired, Waiting | Blocked | Paused) => true,
            (Blocked, Waiting | PausedAndBlocked) => true,
            (Paused, Waiting | Blocked | PausedAndBlocked) => true,
            (PausedAndBlocked, Paused | Blocked | Waiting) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerState::Waiting => "waiting",
            TriggerState::Acquired => "acquired",
            TriggerState::Paused => "paused",
            TriggerState::PausedAndBlocked => "paused_and_blocked",
            TriggerState::Blocked => "blocked",
            TriggerState::Complete => "complete",
            TriggerState::Error => "error",
        }
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TriggerState::Waiting),
            "acquired" => Ok(TriggerState::Acquired),
            "paused" => Ok(TriggerState::Paused),
            "paused_and_blocked" => Ok(TriggerState::PausedAndBlocked),
            "blocked" => Ok(TriggerState::Blocked),
            "complete" => Ok(TriggerState::Complete),
            "error" => Ok(TriggerState::Error),
            other => Err(format!("unknown trigger state: {}", other)),
        }
    }
}

/// Host-facing view of a trigger's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerStatus {
    /// No such trigger.
    None,
    Normal,
    Paused,
    Complete,
    Error,
    Blocked,
}

impl From<TriggerState> for TriggerStatus {
    fn from(state: TriggerState) -> Self {
        match state {
            TriggerState::Complete => TriggerStatus::Complete,
            TriggerState::Paused | TriggerState::PausedAndBlocked => TriggerStatus::Paused,
            TriggerState::Blocked => TriggerStatus::Blocked,
            TriggerState::Error => TriggerStatus::Error,
            TriggerState::Waiting | TriggerState::Acquired => TriggerStatus::Normal,
        }
    }
}
