//! Session policy: timing limits, activity signals and prompt wording.
//!
//! [`PolicyConfig`] is the serde-facing shape (plain seconds/milliseconds,
//! every field optional in the file); [`SessionPolicy`] is the validated,
//! immutable form the manager runs with.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::state::TerminationReason;

// ─── Defaults ────────────────────────────────────────────────────────

/// Absolute session lifetime from login (7 hours).
pub const DEFAULT_SESSION_DURATION_SECS: u64 = 7 * 60 * 60;

/// Idle time before the warning prompt (1 hour).
pub const DEFAULT_INACTIVITY_LIMIT_SECS: u64 = 60 * 60;

/// Time the user has to answer the warning (5 minutes).
pub const DEFAULT_WARNING_WINDOW_SECS: u64 = 5 * 60;

/// Minimum spacing between recognized activity events.
pub const DEFAULT_ACTIVITY_THROTTLE_MS: u64 = 2_000;

/// Minimum spacing between validate-session calls triggered by navigation.
/// Zero validates on every navigation.
pub const DEFAULT_NAVIGATION_VALIDATION_INTERVAL_SECS: u64 = 0;

// ─── Activity signals ────────────────────────────────────────────────

/// User interaction kinds that can count as presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySignal {
    MouseDown,
    MouseMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

impl ActivitySignal {
    pub const ALL: [Self; 6] = [
        Self::MouseDown,
        Self::MouseMove,
        Self::KeyPress,
        Self::Scroll,
        Self::TouchStart,
        Self::Click,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MouseDown => "mouse_down",
            Self::MouseMove => "mouse_move",
            Self::KeyPress => "key_press",
            Self::Scroll => "scroll",
            Self::TouchStart => "touch_start",
            Self::Click => "click",
        }
    }
}

impl fmt::Display for ActivitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivitySignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|signal| signal.as_str() == normalized)
            .ok_or_else(|| format!("unknown activity signal: {s}"))
    }
}

// ─── Prompt wording ──────────────────────────────────────────────────

/// Optional overrides for the text shown in prompts.
///
/// Unset entries fall back to wording derived from the policy durations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptMessages {
    pub inactivity_warning: Option<String>,
    pub session_expired: Option<String>,
    pub session_inactive: Option<String>,
    pub session_invalid: Option<String>,
    pub extension_failed: Option<String>,
    pub closed_by_user: Option<String>,
}

// ─── Validated policy ────────────────────────────────────────────────

/// Immutable session policy, loaded once at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionPolicy {
    /// When false the manager never arms a session.
    pub enabled: bool,
    pub session_duration: Duration,
    pub inactivity_limit: Duration,
    pub warning_window: Duration,
    pub activity_signals: BTreeSet<ActivitySignal>,
    pub auto_extend_on_activity: bool,
    pub activity_throttle_window: Duration,
    /// Zero disables the navigation validation throttle.
    pub navigation_validation_interval: Duration,
    /// Validate with the backend when supervision is armed for credentials
    /// that were already present (process start, or navigation after reload).
    pub validate_on_start: bool,
    pub messages: PromptMessages,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            session_duration: Duration::from_secs(DEFAULT_SESSION_DURATION_SECS),
            inactivity_limit: Duration::from_secs(DEFAULT_INACTIVITY_LIMIT_SECS),
            warning_window: Duration::from_secs(DEFAULT_WARNING_WINDOW_SECS),
            activity_signals: ActivitySignal::ALL.into_iter().collect(),
            auto_extend_on_activity: false,
            activity_throttle_window: Duration::from_millis(DEFAULT_ACTIVITY_THROTTLE_MS),
            navigation_validation_interval: Duration::from_secs(
                DEFAULT_NAVIGATION_VALIDATION_INTERVAL_SECS,
            ),
            validate_on_start: true,
            messages: PromptMessages::default(),
        }
    }
}

impl SessionPolicy {
    /// Warning countdown in whole seconds, rounded up.
    pub fn warning_countdown_secs(&self) -> u64 {
        let window = self.warning_window;
        window.as_secs() + u64::from(window.subsec_nanos() > 0)
    }

    /// Text of the inactivity warning prompt.
    pub fn warning_message(&self) -> String {
        self.messages.inactivity_warning.clone().unwrap_or_else(|| {
            format!(
                "Your session will close in {} due to inactivity",
                describe_duration(self.warning_window)
            )
        })
    }

    /// Human-readable text for the "session closed" prompt.
    pub fn reason_message(&self, reason: TerminationReason) -> String {
        let messages = &self.messages;
        let custom = match reason {
            TerminationReason::ExpiredByDuration => &messages.session_expired,
            TerminationReason::InactivityTimeout => &messages.session_inactive,
            TerminationReason::InvalidSession => &messages.session_invalid,
            TerminationReason::ExtensionFailed => &messages.extension_failed,
            TerminationReason::ClosedByUser => &messages.closed_by_user,
        };
        if let Some(text) = custom {
            return text.clone();
        }
        match reason {
            TerminationReason::ExpiredByDuration => format!(
                "Session expired: maximum duration reached ({})",
                describe_duration(self.session_duration)
            ),
            TerminationReason::InactivityTimeout => "Session closed due to inactivity".to_string(),
            TerminationReason::InvalidSession => "Session invalid or expired".to_string(),
            TerminationReason::ExtensionFailed => "Could not extend session".to_string(),
            TerminationReason::ClosedByUser => "Session closed by user".to_string(),
        }
    }
}

/// Render a duration the way prompts phrase it: "7 hours", "1 minute", "45 seconds".
pub fn describe_duration(duration: Duration) -> String {
    fn unit(count: u64, singular: &str) -> String {
        if count == 1 {
            format!("1 {singular}")
        } else {
            format!("{count} {singular}s")
        }
    }

    let secs = duration.as_secs();
    if secs >= 3600 && secs % 3600 == 0 {
        unit(secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        unit(secs / 60, "minute")
    } else {
        unit(secs, "second")
    }
}

// ─── Serde-facing config ─────────────────────────────────────────────

/// Session policy as written in the `[session]` section of a config file
/// or in a replay scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub enabled: bool,
    pub session_duration_secs: u64,
    pub inactivity_limit_secs: u64,
    pub warning_window_secs: u64,
    pub activity_throttle_ms: u64,
    pub activity_signals: Vec<ActivitySignal>,
    pub auto_extend_on_activity: bool,
    pub navigation_validation_interval_secs: u64,
    pub validate_on_start: bool,
    pub messages: PromptMessages,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
            inactivity_limit_secs: DEFAULT_INACTIVITY_LIMIT_SECS,
            warning_window_secs: DEFAULT_WARNING_WINDOW_SECS,
            activity_throttle_ms: DEFAULT_ACTIVITY_THROTTLE_MS,
            activity_signals: ActivitySignal::ALL.to_vec(),
            auto_extend_on_activity: false,
            navigation_validation_interval_secs: DEFAULT_NAVIGATION_VALIDATION_INTERVAL_SECS,
            validate_on_start: true,
            messages: PromptMessages::default(),
        }
    }
}

impl PolicyConfig {
    /// Validate and convert into the runtime policy.
    pub fn into_policy(self) -> Result<SessionPolicy, PolicyError> {
        for (field, value) in [
            ("session_duration_secs", self.session_duration_secs),
            ("inactivity_limit_secs", self.inactivity_limit_secs),
            ("warning_window_secs", self.warning_window_secs),
            ("activity_throttle_ms", self.activity_throttle_ms),
        ] {
            if value == 0 {
                return Err(PolicyError::ZeroDuration { field });
            }
        }

        for (field, value_secs) in [
            ("inactivity_limit", self.inactivity_limit_secs),
            ("warning_window", self.warning_window_secs),
        ] {
            if value_secs >= self.session_duration_secs {
                return Err(PolicyError::ExceedsSession {
                    field,
                    value_secs,
                    session_secs: self.session_duration_secs,
                });
            }
        }

        if self.activity_signals.is_empty() {
            return Err(PolicyError::NoActivitySignals);
        }

        Ok(SessionPolicy {
            enabled: self.enabled,
            session_duration: Duration::from_secs(self.session_duration_secs),
            inactivity_limit: Duration::from_secs(self.inactivity_limit_secs),
            warning_window: Duration::from_secs(self.warning_window_secs),
            activity_signals: self.activity_signals.into_iter().collect(),
            auto_extend_on_activity: self.auto_extend_on_activity,
            activity_throttle_window: Duration::from_millis(self.activity_throttle_ms),
            navigation_validation_interval: Duration::from_secs(
                self.navigation_validation_interval_secs,
            ),
            validate_on_start: self.validate_on_start,
            messages: self.messages,
        })
    }
}
