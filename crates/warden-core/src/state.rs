//! Runtime session state owned by the lifecycle manager.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{TimerHandle, TimerKind};
use crate::ports::RequestId;

// ─── Phase ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Dormant,
    Active,
    Warning,
    /// Transient: only observable while a termination is being carried out.
    Terminating,
}

impl Phase {
    /// Active or Warning: a session is being supervised.
    pub fn is_supervised(self) -> bool {
        matches!(self, Self::Active | Self::Warning)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dormant => "dormant",
            Self::Active => "active",
            Self::Warning => "warning",
            Self::Terminating => "terminating",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Termination reason ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ExpiredByDuration,
    InactivityTimeout,
    InvalidSession,
    ExtensionFailed,
    ClosedByUser,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExpiredByDuration => "expired_by_duration",
            Self::InactivityTimeout => "inactivity_timeout",
            Self::InvalidSession => "invalid_session",
            Self::ExtensionFailed => "extension_failed",
            Self::ClosedByUser => "closed_by_user",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExpiredByDuration => "expired by absolute duration",
            Self::InactivityTimeout => "inactivity timeout",
            Self::InvalidSession => "invalid session",
            Self::ExtensionFailed => "extension failed",
            Self::ClosedByUser => "closed by user",
        })
    }
}

// ─── Armed timers ────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimers {
    pub session_duration: Option<TimerHandle>,
    pub inactivity: Option<TimerHandle>,
    pub warning_countdown: Option<TimerHandle>,
}

impl ArmedTimers {
    pub fn slot(&self, kind: TimerKind) -> Option<TimerHandle> {
        match kind {
            TimerKind::SessionDuration => self.session_duration,
            TimerKind::Inactivity => self.inactivity,
            TimerKind::WarningCountdown => self.warning_countdown,
        }
    }

    pub fn slot_mut(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::SessionDuration => &mut self.session_duration,
            TimerKind::Inactivity => &mut self.inactivity,
            TimerKind::WarningCountdown => &mut self.warning_countdown,
        }
    }

    /// Whether `handle` is exactly the timer currently armed for its kind.
    pub fn is_current(&self, handle: TimerHandle) -> bool {
        self.slot(handle.kind) == Some(handle)
    }

    pub fn kinds(&self) -> Vec<TimerKind> {
        [
            TimerKind::SessionDuration,
            TimerKind::Inactivity,
            TimerKind::WarningCountdown,
        ]
        .into_iter()
        .filter(|kind| self.slot(*kind).is_some())
        .collect()
    }

    /// Empty every slot, returning the handles that were armed.
    pub fn take_all(&mut self) -> Vec<TimerHandle> {
        [
            self.session_duration.take(),
            self.inactivity.take(),
            self.warning_countdown.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

// ─── Runtime state ───────────────────────────────────────────────────

/// In-memory only; rebuilt from policy and identity state on each start.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionRuntimeState {
    pub phase: Phase,
    /// Bumped every time a session is armed; backend completions carrying an
    /// older epoch belong to a session that no longer exists.
    pub epoch: u64,
    pub session_started_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub timers: ArmedTimers,
    pub pending_extend: Option<RequestId>,
    pub last_validation_at: Option<DateTime<Utc>>,
}

impl SessionRuntimeState {
    /// Drop everything belonging to the current session, keeping the epoch.
    pub fn reset(&mut self) {
        *self = Self {
            epoch: self.epoch,
            ..Self::default()
        };
    }

    /// Check the timer/phase invariants. Returns a description of the first
    /// violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let timers = &self.timers;
        if timers.warning_countdown.is_some() && self.phase != Phase::Warning {
            return Err(format!("warning_countdown armed in {}", self.phase));
        }
        if timers.inactivity.is_some() && self.phase != Phase::Active {
            return Err(format!("inactivity armed in {}", self.phase));
        }
        if timers.session_duration.is_some() && !self.phase.is_supervised() {
            return Err(format!("session_duration armed in {}", self.phase));
        }
        match self.phase {
            Phase::Active if timers.session_duration.is_none() || timers.inactivity.is_none() => {
                Err("active session missing a timer".to_string())
            }
            Phase::Warning
                if timers.session_duration.is_none() || timers.warning_countdown.is_none() =>
            {
                Err("warning session missing a timer".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Read-only snapshot for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub phase: Phase,
    pub session_started_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub armed_timers: Vec<TimerKind>,
    pub extend_pending: bool,
    pub last_termination: Option<TerminationReason>,
}
