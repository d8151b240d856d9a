//! Deterministic scenario replay.
//!
//! A scenario is a policy plus a list of timed steps. Each step advances the
//! manual clock to `at_secs` (firing every timer due on the way), applies an
//! optional action and then checks optional expectations. The run produces a
//! [`ReplayReport`] with a timeline and every expectation that did not hold.
//!
//! [`ReplayHarness`] is the wiring underneath: the manager with in-memory
//! collaborators, the event bus routed back into the manager, and backend
//! calls completed with scripted results.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, ManualClock, to_delta};
use crate::error::{BackendError, ScenarioError};
use crate::event_bus::{EventKind, SessionEvent, SessionEventBus};
use crate::manager::{Collaborators, SessionInput, SessionLifecycleManager};
use crate::memory::{MemoryIdentity, MemoryRoute, RecordingPrompts, ScriptedBackend};
use crate::policy::{ActivitySignal, PolicyConfig, SessionPolicy};
use crate::ports::{BackendCall, ClosedPrompt, IdentityHolder, WarningOutcome};
use crate::state::{Phase, TerminationReason};

/// Wall-clock origin of every replay.
pub const REPLAY_EPOCH: &str = "2026-01-01T00:00:00Z";

pub fn replay_epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(REPLAY_EPOCH)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// ─── Harness ─────────────────────────────────────────────────────────

type Inbox = Arc<Mutex<VecDeque<SessionInput>>>;

/// Manager wired to in-memory collaborators on a manual clock.
pub struct ReplayHarness {
    pub manager: SessionLifecycleManager<ManualClock>,
    pub clock: ManualClock,
    pub bus: SessionEventBus,
    pub identity: MemoryIdentity,
    pub route: MemoryRoute,
    pub prompts: RecordingPrompts,
    pub backend: ScriptedBackend,
    inbox: Inbox,
    origin: DateTime<Utc>,
    auto_complete: bool,
}

impl ReplayHarness {
    pub fn new(policy: SessionPolicy, origin: DateTime<Utc>, path: &str, login_path: &str) -> Self {
        let clock = ManualClock::new(origin);
        let bus = SessionEventBus::new();
        let identity = MemoryIdentity::new();
        let route = MemoryRoute::new(path, login_path);
        let prompts = RecordingPrompts::new();
        let backend = ScriptedBackend::new();
        let inbox: Inbox = Arc::new(Mutex::new(VecDeque::new()));

        let sink = Arc::clone(&inbox);
        bus.subscribe(EventKind::LoginSucceeded, move |event| {
            push(&sink, SessionInput::Event(event.clone()));
        });
        let sink = Arc::clone(&inbox);
        let holder = identity.clone();
        bus.subscribe(EventKind::LogoutRequested, move |event| {
            holder.clear_credentials();
            push(&sink, SessionInput::Event(event.clone()));
        });

        let manager = SessionLifecycleManager::new(
            policy,
            clock.clone(),
            Collaborators {
                identity: Box::new(identity.clone()),
                navigator: Box::new(route.clone()),
                prompts: Box::new(prompts.clone()),
                backend: Box::new(backend.clone()),
            },
            bus.clone(),
        );

        Self {
            manager,
            clock,
            bus,
            identity,
            route,
            prompts,
            backend,
            inbox,
            origin,
            auto_complete: true,
        }
    }

    /// When off, backend requests stay pending until the caller answers them.
    pub fn set_auto_complete(&mut self, enabled: bool) {
        self.auto_complete = enabled;
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn elapsed(&self) -> Duration {
        (self.clock.now() - self.origin)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Feed one input, then everything it causes.
    pub fn send(&mut self, input: SessionInput) {
        self.manager.handle(input);
        self.settle();
    }

    /// Deliver queued bus events and (when enabled) backend completions until
    /// nothing is left.
    pub fn settle(&mut self) {
        loop {
            let next = self
                .inbox
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            if let Some(input) = next {
                self.manager.handle(input);
                continue;
            }
            if !self.auto_complete {
                return;
            }
            let responses = self.backend.complete_pending();
            if responses.is_empty() {
                return;
            }
            for response in responses {
                self.manager.handle(SessionInput::BackendCompleted(response));
            }
        }
    }

    /// Move the clock to `at`, firing due timers in deadline order.
    pub fn advance_to(&mut self, at: DateTime<Utc>) {
        while let Some(handle) = self.clock.pop_due(at) {
            self.send(SessionInput::TimerFired(handle));
        }
        self.clock.set_now(at);
    }

    pub fn advance(&mut self, by: Duration) {
        let at = self
            .clock
            .now()
            .checked_add_signed(to_delta(by))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.advance_to(at);
    }

    /// Sign in and announce it, as the login flow does.
    pub fn login(&mut self, username: &str, token: &str) {
        self.identity.sign_in_as(username, token);
        self.bus.publish(SessionEvent::LoginSucceeded);
        self.settle();
    }

    /// A logout originated outside the manager.
    pub fn external_logout(&mut self, reason: &str) {
        self.bus.publish(SessionEvent::LogoutRequested {
            reason: reason.to_string(),
        });
        self.settle();
    }

    pub fn navigate(&mut self, path: &str) {
        self.route.navigate(path);
        self.send(SessionInput::Navigated);
    }

    pub fn signal(&mut self, signal: ActivitySignal) {
        self.send(SessionInput::Signal(signal));
    }
}

fn push(inbox: &Inbox, input: SessionInput) {
    inbox
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push_back(input);
}

// ─── Scenario format ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedResult {
    #[default]
    Ok,
    /// Backend answers 401.
    Auth,
    /// Network failure or non-401 error status.
    Transient,
}

impl ScriptedResult {
    pub fn into_result(self) -> Result<(), BackendError> {
        match self {
            Self::Ok => Ok(()),
            Self::Auth => Err(BackendError::from_status(401)),
            Self::Transient => Err(BackendError::Transient("scripted failure".into())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendScript {
    pub validate: ScriptedResult,
    pub extend: ScriptedResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Process start (credentials may already be restored).
    Start,
    /// Sign in and publish `login-succeeded`.
    Login {
        username: String,
        #[serde(default = "default_token")]
        token: String,
    },
    /// Post-login activation after redirection.
    Activate,
    Navigate { path: String },
    Activity {
        #[serde(default = "default_signal")]
        signal: ActivitySignal,
    },
    /// Emit `signal` every `every_secs` for `for_secs`, advancing the clock.
    KeepActive {
        every_secs: u64,
        for_secs: u64,
        #[serde(default = "default_signal")]
        signal: ActivitySignal,
    },
    Choose { outcome: WarningOutcome },
    /// `logout-requested` published by someone other than the manager.
    ExternalLogout { reason: String },
    SetBackend {
        call: BackendCall,
        result: ScriptedResult,
    },
}

fn default_token() -> String {
    "Bearer replay-token".to_string()
}

fn default_signal() -> ActivitySignal {
    ActivitySignal::MouseMove
}

fn default_start_path() -> String {
    "/".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub at_secs: u64,
    #[serde(default)]
    pub action: Option<ScenarioAction>,
    #[serde(default)]
    pub expect_phase: Option<Phase>,
    /// Reason of the most recent termination.
    #[serde(default)]
    pub expect_reason: Option<TerminationReason>,
    /// Total warning prompts shown so far.
    #[serde(default)]
    pub expect_warnings: Option<usize>,
    /// Total closed prompts shown so far.
    #[serde(default)]
    pub expect_closed: Option<usize>,
    /// Countdown of the most recent warning prompt.
    #[serde(default)]
    pub expect_countdown_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default = "default_start_path")]
    pub start_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Username whose credentials are already stored at t=0.
    #[serde(default)]
    pub signed_in: Option<String>,
    #[serde(default)]
    pub backend: BackendScript,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ─── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub at_secs: u64,
    pub action: Option<String>,
    pub phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub name: String,
    pub timeline: Vec<TimelineEntry>,
    pub warnings: usize,
    pub closed: Vec<ClosedPrompt>,
    pub mismatches: Vec<String>,
}

impl ReplayReport {
    pub fn is_success(&self) -> bool {
        self.mismatches.is_empty()
    }
}

// ─── Replay ──────────────────────────────────────────────────────────

pub fn replay(scenario: &Scenario) -> Result<ReplayReport, ScenarioError> {
    let policy = scenario.policy.clone().into_policy()?;
    let origin = replay_epoch();
    let mut harness =
        ReplayHarness::new(policy, origin, &scenario.start_path, &scenario.login_path);
    harness
        .backend
        .set_outcome(BackendCall::Validate, scenario.backend.validate.into_result());
    harness
        .backend
        .set_outcome(BackendCall::Extend, scenario.backend.extend.into_result());
    if let Some(username) = &scenario.signed_in {
        harness.identity.sign_in_as(username, default_token());
    }

    tracing::debug!("replaying scenario {}", scenario.name);
    let mut timeline = Vec::with_capacity(scenario.steps.len());
    let mut mismatches = Vec::new();
    let mut previous_secs = 0;

    for (index, step) in scenario.steps.iter().enumerate() {
        if step.at_secs < previous_secs {
            return Err(ScenarioError::StepOutOfOrder {
                index,
                at_secs: step.at_secs,
                previous_secs,
            });
        }
        previous_secs = step.at_secs;

        let at = origin
            .checked_add_signed(to_delta(Duration::from_secs(step.at_secs)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        harness.advance_to(at);
        if let Some(action) = &step.action {
            apply(&mut harness, action);
        }

        let elapsed = harness.elapsed().as_secs();
        check_step(&harness, index, elapsed, step, &mut mismatches);
        timeline.push(TimelineEntry {
            at_secs: elapsed,
            action: step.action.as_ref().map(describe),
            phase: harness.manager.phase(),
        });
    }

    Ok(ReplayReport {
        name: scenario.name.clone(),
        timeline,
        warnings: harness.prompts.warnings().len(),
        closed: harness.prompts.closed(),
        mismatches,
    })
}

fn apply(harness: &mut ReplayHarness, action: &ScenarioAction) {
    match action {
        ScenarioAction::Start => harness.send(SessionInput::Start),
        ScenarioAction::Login { username, token } => harness.login(username, token),
        ScenarioAction::Activate => harness.send(SessionInput::LoginCompleted),
        ScenarioAction::Navigate { path } => harness.navigate(path),
        ScenarioAction::Activity { signal } => harness.signal(*signal),
        ScenarioAction::KeepActive {
            every_secs,
            for_secs,
            signal,
        } => {
            let every = (*every_secs).max(1);
            let mut offset = Some(every);
            while let Some(current) = offset.filter(|o| *o <= *for_secs) {
                harness.advance(Duration::from_secs(every));
                harness.signal(*signal);
                offset = current.checked_add(every);
            }
        }
        ScenarioAction::Choose { outcome } => harness.send(SessionInput::WarningResolved(*outcome)),
        ScenarioAction::ExternalLogout { reason } => harness.external_logout(reason),
        ScenarioAction::SetBackend { call, result } => {
            harness.backend.set_outcome(*call, result.into_result());
        }
    }
}

fn describe(action: &ScenarioAction) -> String {
    match action {
        ScenarioAction::Start => "start".into(),
        ScenarioAction::Login { username, .. } => format!("login {username}"),
        ScenarioAction::Activate => "activate".into(),
        ScenarioAction::Navigate { path } => format!("navigate {path}"),
        ScenarioAction::Activity { signal } => format!("activity {signal}"),
        ScenarioAction::KeepActive {
            every_secs,
            for_secs,
            ..
        } => format!("keep active every {every_secs}s for {for_secs}s"),
        ScenarioAction::Choose { outcome } => format!("choose {outcome:?}").to_lowercase(),
        ScenarioAction::ExternalLogout { .. } => "external logout".into(),
        ScenarioAction::SetBackend { call, result } => {
            format!("backend {} -> {result:?}", call.as_str()).to_lowercase()
        }
    }
}

fn check_step(
    harness: &ReplayHarness,
    index: usize,
    elapsed: u64,
    step: &ScenarioStep,
    mismatches: &mut Vec<String>,
) {
    let mut fail = |what: String| mismatches.push(format!("step {index} at {elapsed}s: {what}"));

    let phase = harness.manager.phase();
    if let Some(expected) = step.expect_phase
        && expected != phase
    {
        fail(format!("expected phase {expected}, got {phase}"));
    }

    let reason = harness.manager.last_termination();
    if let Some(expected) = step.expect_reason
        && reason != Some(expected)
    {
        let got = reason.map_or("none", TerminationReason::as_str);
        fail(format!("expected termination {}, got {got}", expected.as_str()));
    }

    let warnings = harness.prompts.warnings();
    if let Some(expected) = step.expect_warnings
        && expected != warnings.len()
    {
        fail(format!("expected {expected} warning(s), got {}", warnings.len()));
    }

    if let Some(expected) = step.expect_countdown_secs {
        let got = warnings.last().map(|w| w.countdown_secs);
        if got != Some(expected) {
            fail(format!("expected warning countdown {expected}s, got {got:?}"));
        }
    }

    let closed = harness.prompts.closed().len();
    if let Some(expected) = step.expect_closed
        && expected != closed
    {
        fail(format!("expected {expected} closed prompt(s), got {closed}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(json: &str) -> Scenario {
        Scenario::from_json(json).expect("valid scenario")
    }

    #[test]
    fn minimal_scenario_uses_defaults() {
        let s = scenario(r#"{"name": "empty", "steps": []}"#);
        assert_eq!(s.start_path, "/");
        assert_eq!(s.login_path, "/login");
        assert_eq!(s.policy, PolicyConfig::default());
        let report = replay(&s).expect("replays");
        assert!(report.is_success());
        assert!(report.timeline.is_empty());
    }

    #[test]
    fn steps_must_not_go_back_in_time() {
        let s = scenario(
            r#"{"name": "backwards", "steps": [{"at_secs": 10}, {"at_secs": 5}]}"#,
        );
        let err = replay(&s).expect_err("out of order");
        assert!(matches!(
            err,
            ScenarioError::StepOutOfOrder {
                index: 1,
                at_secs: 5,
                previous_secs: 10
            }
        ));
    }

    #[test]
    fn invalid_policy_rejected() {
        let s = scenario(
            r#"{"name": "bad", "policy": {"warning_window_secs": 0}, "steps": []}"#,
        );
        assert!(matches!(replay(&s), Err(ScenarioError::Policy(_))));
    }

    #[test]
    fn mismatches_are_reported_not_fatal() {
        let s = scenario(
            r#"{
                "name": "wrong expectation",
                "signed_in": "ana",
                "steps": [
                    {"at_secs": 0, "action": {"type": "start"}, "expect_phase": "warning"},
                    {"at_secs": 1, "expect_phase": "active", "expect_closed": 0}
                ]
            }"#,
        );
        let report = replay(&s).expect("replays");
        assert_eq!(report.mismatches.len(), 1);
        assert!(report.mismatches[0].contains("expected phase warning, got active"));
        assert_eq!(report.timeline[0].action.as_deref(), Some("start"));
    }

    #[test]
    fn keep_active_near_u64_max_stops() {
        let s = scenario(
            r#"{
                "name": "huge keep_active",
                "signed_in": "ana",
                "steps": [
                    {"at_secs": 0, "action": {"type": "start"}},
                    {"at_secs": 0, "action": {"type": "keep_active",
                        "every_secs": 9223372036854775808,
                        "for_secs": 18446744073709551615},
                     "expect_phase": "dormant", "expect_reason": "expired_by_duration"}
                ]
            }"#,
        );
        let report = replay(&s).expect("replays");
        assert!(report.is_success(), "{:?}", report.mismatches);
    }

    #[test]
    fn harness_routes_logout_event_to_identity() {
        let mut harness = ReplayHarness::new(SessionPolicy::default(), replay_epoch(), "/", "/login");
        harness.login("ana", "Bearer a");
        assert_eq!(harness.manager.phase(), Phase::Active);

        assert!(harness.manager.terminate(TerminationReason::ClosedByUser));
        harness.settle();
        assert!(!harness.identity.is_authenticated());
        assert_eq!(harness.manager.phase(), Phase::Dormant);
        assert_eq!(harness.backend.count(BackendCall::Invalidate), 1);
    }
}
