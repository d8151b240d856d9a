//! Error types for policy loading, backend calls and scenario replay.

use thiserror::Error;

/// Status code the backend uses to say the session or token is no longer valid.
pub const AUTH_FAILURE_STATUS: u16 = 401;

/// Rejected [`crate::policy::PolicyConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("{field} ({value_secs}s) must be shorter than session_duration ({session_secs}s)")]
    ExceedsSession {
        field: &'static str,
        value_secs: u64,
        session_secs: u64,
    },

    #[error("at least one activity signal is required")]
    NoActivitySignals,
}

/// Failure of a backend session call.
///
/// `Auth` is always fatal to the session; `Transient` never is by itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("session rejected by backend (status {status})")]
    Auth { status: u16 },

    #[error("transient backend failure: {0}")]
    Transient(String),
}

impl BackendError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        if status == AUTH_FAILURE_STATUS {
            Self::Auth { status }
        } else {
            Self::Transient(format!("unexpected status {status}"))
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Problems with a replay scenario file.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid scenario policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("step {index} at {at_secs}s goes back in time (previous step at {previous_secs}s)")]
    StepOutOfOrder {
        index: usize,
        at_secs: u64,
        previous_secs: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_401_is_auth_class() {
        assert!(BackendError::from_status(401).is_auth());
        assert!(!BackendError::from_status(403).is_auth());
        assert!(!BackendError::from_status(500).is_auth());
        assert!(!BackendError::from_status(503).is_auth());
    }

    #[test]
    fn display_includes_field() {
        let err = PolicyError::ExceedsSession {
            field: "inactivity_limit",
            value_secs: 9000,
            session_secs: 7200,
        };
        assert_eq!(
            err.to_string(),
            "inactivity_limit (9000s) must be shorter than session_duration (7200s)"
        );
    }
}
