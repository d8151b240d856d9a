//! Session lifecycle manager: the Dormant / Active / Warning / Terminating
//! state machine.
//!
//! Every input (timer fire, activity signal, prompt outcome, backend
//! completion, bus event, navigation) is one atomic step against
//! [`SessionRuntimeState`]. Nothing here blocks or sleeps: timers go through
//! [`Clock`], backend calls are dispatched and their completions come back
//! later as [`SessionInput::BackendCompleted`]. Because a completion can
//! arrive after the session it belongs to has ended, every resumption
//! re-checks the phase and the session epoch first.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::activity::ActivityDetector;
use crate::clock::{Clock, TimerHandle, TimerKind, to_delta};
use crate::error::BackendError;
use crate::event_bus::{SessionEvent, SessionEventBus};
use crate::policy::{ActivitySignal, SessionPolicy};
use crate::ports::{
    BackendCall, BackendRequest, BackendResponse, ClosedPrompt, IdentityHolder, Navigator,
    PromptSurface, RequestId, SessionBackend, WarningOutcome, WarningPrompt,
};
use crate::state::{Phase, SessionRuntimeState, SessionStatus, TerminationReason};

/// Injected collaborators, wired once at the composition root.
pub struct Collaborators {
    pub identity: Box<dyn IdentityHolder>,
    pub navigator: Box<dyn Navigator>,
    pub prompts: Box<dyn PromptSurface>,
    pub backend: Box<dyn SessionBackend>,
}

/// Everything that can drive the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// Process start, possibly with credentials restored from storage.
    Start,
    /// Route changed; see [`SessionLifecycleManager::validate_on_navigation`].
    Navigated,
    /// Login finished and redirection settled.
    LoginCompleted,
    Event(SessionEvent),
    Signal(ActivitySignal),
    TimerFired(TimerHandle),
    WarningResolved(WarningOutcome),
    BackendCompleted(BackendResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmOrigin {
    ProcessStart,
    Login,
    Navigation,
}

pub struct SessionLifecycleManager<C: Clock> {
    policy: SessionPolicy,
    clock: C,
    identity: Box<dyn IdentityHolder>,
    navigator: Box<dyn Navigator>,
    prompts: Box<dyn PromptSurface>,
    backend: Box<dyn SessionBackend>,
    bus: SessionEventBus,
    detector: ActivityDetector,
    state: SessionRuntimeState,
    next_request_id: u64,
    last_termination: Option<TerminationReason>,
}

impl<C: Clock> SessionLifecycleManager<C> {
    pub fn new(
        policy: SessionPolicy,
        clock: C,
        collaborators: Collaborators,
        bus: SessionEventBus,
    ) -> Self {
        let detector = ActivityDetector::new(
            policy.activity_signals.clone(),
            policy.activity_throttle_window,
        );
        Self {
            policy,
            clock,
            identity: collaborators.identity,
            navigator: collaborators.navigator,
            prompts: collaborators.prompts,
            backend: collaborators.backend,
            bus,
            detector,
            state: SessionRuntimeState::default(),
            next_request_id: 0,
            last_termination: None,
        }
    }

    pub fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::Start => {
                self.start();
            }
            SessionInput::Navigated => self.validate_on_navigation(),
            SessionInput::LoginCompleted => {
                self.activate_after_login();
            }
            SessionInput::Event(event) => self.on_session_event(&event),
            SessionInput::Signal(signal) => self.on_activity_signal(signal),
            SessionInput::TimerFired(handle) => self.on_timer(handle),
            SessionInput::WarningResolved(outcome) => self.on_warning_outcome(outcome),
            SessionInput::BackendCompleted(response) => self.on_backend_response(response),
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn state(&self) -> &SessionRuntimeState {
        &self.state
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn is_detector_listening(&self) -> bool {
        self.detector.is_listening()
    }

    pub fn last_termination(&self) -> Option<TerminationReason> {
        self.last_termination
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.state.phase,
            session_started_at: self.state.session_started_at,
            last_activity_at: self.state.last_activity_at,
            expires_at: self
                .state
                .session_started_at
                .and_then(|start| offset(start, self.policy.session_duration)),
            armed_timers: self.state.timers.kinds(),
            extend_pending: self.state.pending_extend.is_some(),
            last_termination: self.last_termination,
        }
    }

    // ─── Entry points ────────────────────────────────────────────────

    /// Arm supervision at process start if credentials are already present.
    pub fn start(&mut self) -> bool {
        let armed = self.arm(ArmOrigin::ProcessStart);
        if !armed {
            tracing::debug!("no session to supervise at start");
        }
        armed
    }

    /// Call on every route change.
    ///
    /// On the login page this does nothing. An authenticated user with no
    /// supervision (e.g. after a full reload) gets armed. A supervised session
    /// gets a best-effort validate-session call.
    pub fn validate_on_navigation(&mut self) {
        if self.navigator.is_on_login_page() {
            tracing::debug!("on login page, skipping session validation");
            return;
        }

        match self.state.phase {
            Phase::Dormant => {
                if self.identity.is_authenticated() {
                    self.arm(ArmOrigin::Navigation);
                } else {
                    tracing::debug!("no authenticated user, nothing to validate");
                }
            }
            Phase::Active | Phase::Warning => {
                let now = self.clock.now();
                if let Some(last) = self.state.last_validation_at {
                    let elapsed = now.signed_duration_since(last);
                    if elapsed < to_delta(self.policy.navigation_validation_interval) {
                        tracing::debug!(
                            "session validated {}s ago, skipping",
                            elapsed.num_seconds()
                        );
                        return;
                    }
                }
                self.dispatch_validation(now);
            }
            Phase::Terminating => {}
        }
    }

    /// Arm supervision once login has completed. Guarded against double-arming.
    pub fn activate_after_login(&mut self) -> bool {
        if self.state.phase.is_supervised() {
            tracing::debug!("session already supervised, ignoring activation");
            return false;
        }
        self.arm(ArmOrigin::Login)
    }

    pub fn on_session_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::LoginSucceeded => {
                // New credentials mean a new session: restart supervision.
                if self.stop_supervision() {
                    tracing::info!("login while supervised, restarting supervision");
                }
                self.arm(ArmOrigin::Login);
            }
            SessionEvent::LogoutRequested { reason } => {
                if self.stop_supervision() {
                    tracing::info!("supervision stopped by logout: {reason}");
                }
            }
        }
    }

    pub fn on_activity_signal(&mut self, signal: ActivitySignal) {
        if !self.state.phase.is_supervised() || self.navigator.is_on_login_page() {
            return;
        }
        let now = self.clock.now();
        if self.detector.observe(signal, now) {
            self.record_activity(now);
        }
    }

    pub fn on_timer(&mut self, handle: TimerHandle) {
        if !self.state.timers.is_current(handle) {
            tracing::debug!("stale {} timer #{} ignored", handle.kind, handle.id);
            return;
        }
        *self.state.timers.slot_mut(handle.kind) = None;

        match (handle.kind, self.state.phase) {
            (TimerKind::SessionDuration, _) => {
                tracing::info!("absolute session duration reached");
                self.terminate(TerminationReason::ExpiredByDuration);
            }
            (TimerKind::Inactivity, Phase::Active) => self.enter_warning(),
            (TimerKind::WarningCountdown, Phase::Warning) => {
                tracing::info!("warning window elapsed without a response");
                self.terminate(TerminationReason::InactivityTimeout);
            }
            (kind, phase) => {
                tracing::debug!("{kind} timer fired in {phase}, ignored");
            }
        }
    }

    pub fn on_warning_outcome(&mut self, outcome: WarningOutcome) {
        match outcome {
            WarningOutcome::Extend | WarningOutcome::Logout
                if self.state.phase != Phase::Warning =>
            {
                tracing::debug!(
                    "warning outcome {outcome:?} arrived in {}, ignored",
                    self.state.phase
                );
            }
            WarningOutcome::Extend => self.request_extend(),
            WarningOutcome::Logout => {
                self.terminate(TerminationReason::ClosedByUser);
            }
            // The displayed countdown is cosmetic; the warning_countdown timer decides.
            WarningOutcome::Timeout => {
                tracing::debug!("warning countdown display elapsed");
            }
        }
    }

    pub fn on_backend_response(&mut self, response: BackendResponse) {
        let BackendResponse { request, result } = response;

        if request.call == BackendCall::Invalidate {
            match result {
                Ok(()) => tracing::debug!("session invalidated on backend"),
                Err(e) => tracing::warn!("session invalidation failed (ignored): {e}"),
            }
            return;
        }

        if request.epoch != self.state.epoch || !self.state.phase.is_supervised() {
            tracing::debug!(
                "{} response #{} belongs to a finished session, ignored",
                request.call.as_str(),
                request.id.0
            );
            return;
        }

        match request.call {
            BackendCall::Validate => match result {
                Ok(()) => tracing::debug!("session still valid"),
                Err(e) if e.is_auth() => {
                    tracing::warn!("backend rejected session: {e}");
                    self.terminate(TerminationReason::InvalidSession);
                }
                Err(e) => tracing::warn!("session validation failed, treating as transient: {e}"),
            },
            BackendCall::Extend => {
                if self.state.pending_extend == Some(request.id) {
                    self.state.pending_extend = None;
                }
                match result {
                    Ok(()) => self.apply_extension(),
                    Err(e) => self.extension_failed(&e),
                }
            }
            BackendCall::Invalidate => {}
        }
    }

    /// Tear the session down for `reason`.
    ///
    /// Returns `false` (and does nothing) when no session is supervised, so
    /// racing termination requests produce exactly one closed prompt.
    pub fn terminate(&mut self, reason: TerminationReason) -> bool {
        if !self.state.phase.is_supervised() {
            tracing::debug!("no supervised session, ignoring termination ({reason})");
            return false;
        }

        let was_warning = self.state.phase == Phase::Warning;
        self.state.phase = Phase::Terminating;
        self.cancel_all_timers();
        self.detector.stop_listening();

        let message = self.policy.reason_message(reason);
        if was_warning {
            self.prompts.dismiss_warning();
        }
        self.prompts.show_closed(&ClosedPrompt {
            reason,
            message: message.clone(),
        });

        // Read the token before the identity holder reacts to the logout event.
        let token = self.identity.token();
        self.bus
            .publish(SessionEvent::LogoutRequested { reason: message });
        if token.is_some() {
            self.dispatch(BackendCall::Invalidate, token);
        }

        self.state.reset();
        self.last_termination = Some(reason);
        tracing::info!(reason = reason.as_str(), "session terminated: {reason}");
        true
    }

    /// Fire-and-forget invalidate-session for a token the identity holder is
    /// giving up (user sign-out). Supervision itself stops on the bus event.
    pub fn invalidate(&mut self, token: String) -> RequestId {
        self.dispatch(BackendCall::Invalidate, Some(token))
    }

    // ─── Transitions ─────────────────────────────────────────────────

    fn arm(&mut self, origin: ArmOrigin) -> bool {
        if !self.policy.enabled {
            tracing::debug!("session supervision disabled by policy");
            return false;
        }
        if self.state.phase != Phase::Dormant {
            tracing::debug!("session already {}, not re-arming", self.state.phase);
            return false;
        }
        if self.navigator.is_on_login_page() {
            tracing::debug!("on login page, waiting for navigation before arming");
            return false;
        }
        if !self.identity.is_authenticated() {
            tracing::debug!("not authenticated, staying dormant");
            return false;
        }

        let now = self.clock.now();
        self.state.epoch += 1;
        self.state.session_started_at = Some(now);
        self.state.last_activity_at = Some(now);
        self.state.timers.session_duration = Some(
            self.clock
                .schedule(TimerKind::SessionDuration, self.policy.session_duration),
        );
        self.state.timers.inactivity = Some(
            self.clock
                .schedule(TimerKind::Inactivity, self.policy.inactivity_limit),
        );
        self.state.phase = Phase::Active;
        self.detector.start_listening();

        let user = self
            .identity
            .current_user()
            .map_or_else(|| "unknown".to_string(), |u| u.username);
        let expires = offset(now, self.policy.session_duration)
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        tracing::info!(
            epoch = self.state.epoch,
            origin = ?origin,
            "supervising session for {user}, expires at {expires}"
        );

        // Restored credentials may already be dead server-side; fresh logins are not.
        if origin != ArmOrigin::Login && self.policy.validate_on_start {
            self.dispatch_validation(now);
        }
        true
    }

    /// Cancel every timer and return to Dormant without prompts or backend calls.
    fn stop_supervision(&mut self) -> bool {
        if !self.state.phase.is_supervised() {
            return false;
        }
        let was_warning = self.state.phase == Phase::Warning;
        self.cancel_all_timers();
        self.detector.stop_listening();
        if was_warning {
            self.prompts.dismiss_warning();
        }
        self.state.reset();
        true
    }

    fn enter_warning(&mut self) {
        let prompt = WarningPrompt {
            message: self.policy.warning_message(),
            countdown_secs: self.policy.warning_countdown_secs(),
            can_extend: true,
        };
        self.state.phase = Phase::Warning;
        self.state.timers.warning_countdown = Some(
            self.clock
                .schedule(TimerKind::WarningCountdown, self.policy.warning_window),
        );
        tracing::info!(
            "inactivity limit reached, warning user ({}s to respond)",
            prompt.countdown_secs
        );
        self.prompts.show_warning(&prompt);
    }

    fn record_activity(&mut self, now: DateTime<Utc>) {
        if self.state.last_activity_at.is_none_or(|last| now > last) {
            self.state.last_activity_at = Some(now);
        }

        match self.state.phase {
            Phase::Active => {
                self.rearm_inactivity();
                tracing::debug!("activity observed, inactivity timer re-armed");
                if self.policy.auto_extend_on_activity {
                    self.request_extend();
                }
            }
            Phase::Warning if self.policy.auto_extend_on_activity => self.request_extend(),
            Phase::Warning => {
                tracing::debug!("activity during warning, waiting for an explicit choice");
            }
            Phase::Dormant | Phase::Terminating => {}
        }
    }

    fn request_extend(&mut self) {
        if let Some(pending) = self.state.pending_extend {
            tracing::debug!("extend #{} already in flight", pending.0);
            return;
        }
        let token = self.identity.token();
        let id = self.dispatch(BackendCall::Extend, token);
        self.state.pending_extend = Some(id);
    }

    fn apply_extension(&mut self) {
        let now = self.clock.now();
        if self.state.last_activity_at.is_none_or(|last| now > last) {
            self.state.last_activity_at = Some(now);
        }

        if self.state.phase == Phase::Warning {
            if let Some(countdown) = self.state.timers.warning_countdown.take() {
                self.clock.cancel(countdown);
            }
            self.prompts.dismiss_warning();
            self.state.phase = Phase::Active;
            self.rearm_inactivity();
            tracing::info!("session extended, back to active");
        } else {
            self.rearm_inactivity();
            tracing::info!("session extended");
        }
    }

    fn extension_failed(&mut self, error: &BackendError) {
        match self.state.phase {
            Phase::Warning => {
                tracing::error!("could not extend session: {error}");
                self.terminate(TerminationReason::ExtensionFailed);
            }
            Phase::Active if error.is_auth() => {
                tracing::warn!("backend rejected background extend: {error}");
                self.terminate(TerminationReason::InvalidSession);
            }
            _ => tracing::warn!("background extend failed, treating as transient: {error}"),
        }
    }

    // ─── Timers & backend plumbing ───────────────────────────────────

    fn rearm_inactivity(&mut self) {
        if let Some(previous) = self.state.timers.inactivity.take() {
            self.clock.cancel(previous);
        }
        self.state.timers.inactivity = Some(
            self.clock
                .schedule(TimerKind::Inactivity, self.policy.inactivity_limit),
        );
    }

    fn cancel_all_timers(&mut self) {
        for handle in self.state.timers.take_all() {
            self.clock.cancel(handle);
        }
    }

    fn dispatch_validation(&mut self, now: DateTime<Utc>) {
        self.state.last_validation_at = Some(now);
        let token = self.identity.token();
        self.dispatch(BackendCall::Validate, token);
    }

    fn dispatch(&mut self, call: BackendCall, token: Option<String>) -> RequestId {
        self.next_request_id += 1;
        let id = RequestId(self.next_request_id);
        tracing::debug!("dispatching {} #{}", call.as_str(), id.0);
        self.backend.dispatch(BackendRequest {
            id,
            epoch: self.state.epoch,
            call,
            token,
        });
        id
    }
}

fn offset(start: DateTime<Utc>, by: Duration) -> Option<DateTime<Utc>> {
    start.checked_add_signed(to_delta(by))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{MemoryIdentity, MemoryRoute, RecordingPrompts, ScriptedBackend};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn t0() -> DateTime<Utc> {
        ts("2026-02-25T12:00:00Z")
    }

    struct Fixture {
        manager: SessionLifecycleManager<ManualClock>,
        clock: ManualClock,
        identity: MemoryIdentity,
        route: MemoryRoute,
        prompts: RecordingPrompts,
        backend: ScriptedBackend,
    }

    fn fixture(policy: SessionPolicy) -> Fixture {
        let clock = ManualClock::new(t0());
        let identity = MemoryIdentity::new();
        let route = MemoryRoute::new("/", "/login");
        let prompts = RecordingPrompts::new();
        let backend = ScriptedBackend::new();
        let manager = SessionLifecycleManager::new(
            policy,
            clock.clone(),
            Collaborators {
                identity: Box::new(identity.clone()),
                navigator: Box::new(route.clone()),
                prompts: Box::new(prompts.clone()),
                backend: Box::new(backend.clone()),
            },
            SessionEventBus::new(),
        );
        Fixture {
            manager,
            clock,
            identity,
            route,
            prompts,
            backend,
        }
    }

    #[test]
    fn start_without_credentials_stays_dormant() {
        let mut f = fixture(SessionPolicy::default());
        assert!(!f.manager.start());
        assert_eq!(f.manager.phase(), Phase::Dormant);
        assert!(f.clock.pending_kinds().is_empty());
        assert!(!f.manager.is_detector_listening());
    }

    #[test]
    fn start_with_restored_credentials_arms_and_validates() {
        let mut f = fixture(SessionPolicy::default());
        f.identity.sign_in_as("ana", "Bearer abc");

        assert!(f.manager.start());
        assert_eq!(f.manager.phase(), Phase::Active);
        assert_eq!(
            f.clock.pending_kinds(),
            vec![TimerKind::Inactivity, TimerKind::SessionDuration]
        );
        assert_eq!(f.backend.count(BackendCall::Validate), 1);
        assert_eq!(
            f.backend.dispatched()[0].token.as_deref(),
            Some("Bearer abc")
        );
        assert_eq!(f.manager.state().check_invariants(), Ok(()));
    }

    #[test]
    fn validate_on_start_can_be_disabled() {
        let mut f = fixture(SessionPolicy {
            validate_on_start: false,
            ..SessionPolicy::default()
        });
        f.identity.sign_in_as("ana", "t");
        assert!(f.manager.start());
        assert_eq!(f.backend.count(BackendCall::Validate), 0);
    }

    #[test]
    fn disabled_policy_never_arms() {
        let mut f = fixture(SessionPolicy {
            enabled: false,
            ..SessionPolicy::default()
        });
        f.identity.sign_in_as("ana", "t");
        assert!(!f.manager.activate_after_login());
        f.manager.validate_on_navigation();
        assert_eq!(f.manager.phase(), Phase::Dormant);
    }

    #[test]
    fn login_page_blocks_arming() {
        let mut f = fixture(SessionPolicy::default());
        f.identity.sign_in_as("ana", "t");
        f.route.navigate("/login?returnUrl=%2Fadmin");

        assert!(!f.manager.activate_after_login());
        f.manager.on_session_event(&SessionEvent::LoginSucceeded);
        f.manager.validate_on_navigation();
        assert_eq!(f.manager.phase(), Phase::Dormant);

        f.route.navigate("/admin");
        f.manager.validate_on_navigation();
        assert_eq!(f.manager.phase(), Phase::Active);
    }

    #[test]
    fn stale_timer_handle_is_ignored() {
        let mut f = fixture(SessionPolicy::default());
        f.identity.sign_in_as("ana", "t");
        f.manager.activate_after_login();
        let old = f.manager.state().timers.inactivity.expect("armed");

        f.clock.set_now(t0() + chrono::TimeDelta::seconds(5));
        f.manager.on_activity_signal(ActivitySignal::KeyPress);
        assert_ne!(f.manager.state().timers.inactivity, Some(old));

        f.manager.on_timer(old);
        assert_eq!(f.manager.phase(), Phase::Active);
        assert!(f.prompts.warnings().is_empty());
    }

    #[test]
    fn terminate_when_dormant_is_noop() {
        let mut f = fixture(SessionPolicy::default());
        assert!(!f.manager.terminate(TerminationReason::InvalidSession));
        assert!(f.prompts.closed().is_empty());
        assert_eq!(f.manager.last_termination(), None);
    }

    #[test]
    fn terminate_cancels_timers_and_invalidates_token() {
        let mut f = fixture(SessionPolicy::default());
        f.identity.sign_in_as("ana", "Bearer xyz");
        f.manager.activate_after_login();

        assert!(f.manager.terminate(TerminationReason::InvalidSession));
        assert_eq!(f.manager.phase(), Phase::Dormant);
        assert!(f.clock.pending_kinds().is_empty());
        assert!(!f.manager.is_detector_listening());

        let closed = f.prompts.closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, TerminationReason::InvalidSession);
        assert_eq!(closed[0].message, "Session invalid or expired");

        let invalidations: Vec<_> = f
            .backend
            .dispatched()
            .into_iter()
            .filter(|r| r.call == BackendCall::Invalidate)
            .collect();
        assert_eq!(invalidations.len(), 1);
        assert_eq!(invalidations[0].token.as_deref(), Some("Bearer xyz"));
    }

    #[test]
    fn invalidate_dispatches_given_token_only() {
        let mut f = fixture(SessionPolicy::default());
        f.identity.sign_in_as("ana", "Bearer xyz");
        f.manager.activate_after_login();

        f.manager.invalidate("Bearer xyz".into());
        assert_eq!(f.manager.phase(), Phase::Active);
        assert!(f.prompts.closed().is_empty());
        let sent = f.backend.dispatched();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].call, BackendCall::Invalidate);
        assert_eq!(sent[0].token.as_deref(), Some("Bearer xyz"));
    }

    #[test]
    fn status_reports_deadline_and_timers() {
        let mut f = fixture(SessionPolicy::default());
        f.identity.sign_in_as("ana", "t");
        f.manager.activate_after_login();

        let status = f.manager.status();
        assert_eq!(status.phase, Phase::Active);
        assert_eq!(status.session_started_at, Some(t0()));
        assert_eq!(status.expires_at, Some(t0() + chrono::TimeDelta::hours(7)));
        assert_eq!(
            status.armed_timers,
            vec![TimerKind::SessionDuration, TimerKind::Inactivity]
        );
        assert!(!status.extend_pending);
    }
}
