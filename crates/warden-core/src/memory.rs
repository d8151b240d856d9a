//! In-memory collaborators: identity holder, route, prompt recorder and a
//! scripted backend.
//!
//! Each one is a cheap handle over shared state, so the manager can own one
//! clone while the caller keeps another to drive or inspect it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::BackendError;
use crate::ports::{
    BackendCall, BackendRequest, BackendResponse, ClosedPrompt, IdentityHolder, Navigator,
    PromptSurface, SessionBackend, User, WarningPrompt,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ─── Identity ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Credentials {
    user: User,
    token: String,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryIdentity {
    credentials: Arc<Mutex<Option<Credentials>>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: User, token: impl Into<String>) {
        *lock(&self.credentials) = Some(Credentials {
            user,
            token: token.into(),
        });
    }

    /// Sign in with a user whose display name and role are derived from
    /// `username`.
    pub fn sign_in_as(&self, username: &str, token: impl Into<String>) {
        self.sign_in(
            User {
                username: username.to_string(),
                name: username.to_string(),
                role: "user".to_string(),
            },
            token,
        );
    }
}

impl IdentityHolder for MemoryIdentity {
    fn is_authenticated(&self) -> bool {
        lock(&self.credentials).is_some()
    }

    fn current_user(&self) -> Option<User> {
        lock(&self.credentials).as_ref().map(|c| c.user.clone())
    }

    fn token(&self) -> Option<String> {
        lock(&self.credentials).as_ref().map(|c| c.token.clone())
    }

    fn clear_credentials(&self) {
        lock(&self.credentials).take();
    }
}

// ─── Route ───────────────────────────────────────────────────────────

/// Current route plus the path of the login page.
#[derive(Debug, Clone)]
pub struct MemoryRoute {
    path: Arc<Mutex<String>>,
    login_path: String,
}

impl MemoryRoute {
    pub fn new(initial: &str, login_path: &str) -> Self {
        Self {
            path: Arc::new(Mutex::new(initial.to_string())),
            login_path: login_path.to_string(),
        }
    }

    pub fn navigate(&self, path: &str) {
        *lock(&self.path) = path.to_string();
    }

    pub fn current(&self) -> String {
        lock(&self.path).clone()
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }
}

impl Navigator for MemoryRoute {
    /// `/login`, `/login?returnUrl=..` and `/login/..` all count.
    fn is_on_login_page(&self) -> bool {
        let path = lock(&self.path);
        match path.strip_prefix(self.login_path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(['?', '#', '/']),
            None => false,
        }
    }
}

// ─── Prompts ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptRecord {
    Warning(WarningPrompt),
    WarningDismissed,
    Closed(ClosedPrompt),
}

#[derive(Debug, Default)]
struct PromptLog {
    records: Vec<PromptRecord>,
    warning_visible: bool,
}

/// Prompt surface that records every request instead of rendering it.
#[derive(Debug, Clone, Default)]
pub struct RecordingPrompts {
    log: Arc<Mutex<PromptLog>>,
}

impl RecordingPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PromptRecord> {
        lock(&self.log).records.clone()
    }

    pub fn warnings(&self) -> Vec<WarningPrompt> {
        lock(&self.log)
            .records
            .iter()
            .filter_map(|r| match r {
                PromptRecord::Warning(w) => Some(w.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<ClosedPrompt> {
        lock(&self.log)
            .records
            .iter()
            .filter_map(|r| match r {
                PromptRecord::Closed(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn warning_visible(&self) -> bool {
        lock(&self.log).warning_visible
    }
}

impl PromptSurface for RecordingPrompts {
    fn show_warning(&mut self, prompt: &WarningPrompt) {
        let mut log = lock(&self.log);
        log.records.push(PromptRecord::Warning(prompt.clone()));
        log.warning_visible = true;
    }

    fn dismiss_warning(&mut self) {
        let mut log = lock(&self.log);
        if log.warning_visible {
            log.warning_visible = false;
            log.records.push(PromptRecord::WarningDismissed);
        }
    }

    fn show_closed(&mut self, prompt: &ClosedPrompt) {
        lock(&self.log)
            .records
            .push(PromptRecord::Closed(prompt.clone()));
    }
}

// ─── Backend ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Script {
    dispatched: Vec<BackendRequest>,
    pending: VecDeque<BackendRequest>,
    outcomes: HashMap<BackendCall, Result<(), BackendError>>,
}

/// Backend that records requests and answers them with scripted results.
///
/// Invalidate calls are recorded but never queued for completion. Calls
/// without a scripted outcome succeed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outcome(&self, call: BackendCall, result: Result<(), BackendError>) {
        lock(&self.script).outcomes.insert(call, result);
    }

    pub fn dispatched(&self) -> Vec<BackendRequest> {
        lock(&self.script).dispatched.clone()
    }

    pub fn count(&self, call: BackendCall) -> usize {
        lock(&self.script)
            .dispatched
            .iter()
            .filter(|r| r.call == call)
            .count()
    }

    /// Drain requests awaiting completion without answering them.
    pub fn take_pending(&self) -> Vec<BackendRequest> {
        lock(&self.script).pending.drain(..).collect()
    }

    /// Drain requests awaiting completion and answer each with its scripted
    /// outcome.
    pub fn complete_pending(&self) -> Vec<BackendResponse> {
        let mut script = lock(&self.script);
        let pending: Vec<BackendRequest> = script.pending.drain(..).collect();
        pending
            .into_iter()
            .map(|request| {
                let result = script
                    .outcomes
                    .get(&request.call)
                    .cloned()
                    .unwrap_or(Ok(()));
                BackendResponse { request, result }
            })
            .collect()
    }
}

impl SessionBackend for ScriptedBackend {
    fn dispatch(&mut self, request: BackendRequest) {
        let mut script = lock(&self.script);
        if request.call != BackendCall::Invalidate {
            script.pending.push_back(request.clone());
        }
        script.dispatched.push(request);
    }
}
