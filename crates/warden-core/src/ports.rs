//! Collaborator interfaces the lifecycle manager depends on.
//!
//! Identity holder, navigation query, prompt surface and backend adapter are
//! injected at composition time. None of them may call back into the
//! manager synchronously; results (prompt outcomes, backend completions)
//! return as [`crate::manager::SessionInput`] values.

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::state::TerminationReason;

// ─── Identity & navigation ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub name: String,
    pub role: String,
}

/// Credential store view used by the manager.
pub trait IdentityHolder: Send {
    fn is_authenticated(&self) -> bool;
    fn current_user(&self) -> Option<User>;
    /// Raw token, as sent in the `Authorization` header.
    fn token(&self) -> Option<String>;
    fn clear_credentials(&self);
}

pub trait Navigator: Send {
    fn is_on_login_page(&self) -> bool;
}

// ─── Prompts ─────────────────────────────────────────────────────────

/// Request for the inactivity warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningPrompt {
    pub message: String,
    pub countdown_secs: u64,
    pub can_extend: bool,
}

/// How the user (or the cosmetic countdown) closed the warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningOutcome {
    Extend,
    Logout,
    Timeout,
}

/// "Session closed" notice. Navigation after it is the user's choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedPrompt {
    pub reason: TerminationReason,
    pub message: String,
}

pub trait PromptSurface: Send {
    fn show_warning(&mut self, prompt: &WarningPrompt);
    /// Close a visible warning without an outcome. No-op if none is visible.
    fn dismiss_warning(&mut self);
    fn show_closed(&mut self, prompt: &ClosedPrompt);
}

// ─── Backend ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendCall {
    Validate,
    Extend,
    /// Fire-and-forget; its completion is never consumed.
    Invalidate,
}

impl BackendCall {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Extend => "extend",
            Self::Invalidate => "invalidate",
        }
    }
}

/// One backend call, tagged with the session epoch it was issued in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub id: RequestId,
    pub epoch: u64,
    pub call: BackendCall,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub request: BackendRequest,
    pub result: Result<(), BackendError>,
}

/// Non-blocking backend adapter: `dispatch` returns immediately and the
/// completion comes back later as a [`BackendResponse`].
pub trait SessionBackend: Send {
    fn dispatch(&mut self, request: BackendRequest);
}
