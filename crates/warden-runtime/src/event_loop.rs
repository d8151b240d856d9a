//! Session loop: the single consumer of every [`SessionInput`].
//!
//! Timers, backend completions, bus events and the prompt ticker all post
//! into one unbounded channel; stdin commands are read in the same
//! `select!`. The manager is only ever touched from this loop.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use warden_core::{
    Collaborators, EventKind, IdentityHolder, MemoryRoute, Navigator, SessionBackend,
    SessionEventBus, SessionInput, SessionLifecycleManager, SessionPolicy, WarningOutcome,
};

use crate::clock::TokioClock;
use crate::console::{self, Command, HELP};
use crate::identity::CredentialStore;
use crate::prompt::ConsolePrompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Supervisor {
    manager: SessionLifecycleManager<TokioClock>,
    identity: CredentialStore,
    route: MemoryRoute,
    start_path: String,
    tx: UnboundedSender<SessionInput>,
    rx: UnboundedReceiver<SessionInput>,
}

impl Supervisor {
    pub fn new(
        policy: SessionPolicy,
        route: MemoryRoute,
        start_path: &str,
        backend: Box<dyn SessionBackend>,
        tx: UnboundedSender<SessionInput>,
        rx: UnboundedReceiver<SessionInput>,
    ) -> Self {
        let bus = SessionEventBus::new();
        let identity = CredentialStore::new(bus.clone());

        // Bus events reach the manager through the loop, never re-entrantly.
        for kind in [EventKind::LoginSucceeded, EventKind::LogoutRequested] {
            let tx = tx.clone();
            bus.subscribe(kind, move |event| {
                let _ = tx.send(SessionInput::Event(event.clone()));
            });
        }

        let manager = SessionLifecycleManager::new(
            policy,
            TokioClock::new(tx.clone()),
            Collaborators {
                identity: Box::new(identity.clone()),
                navigator: Box::new(route.clone()),
                prompts: Box::new(ConsolePrompt::new(tx.clone())),
                backend,
            },
            bus,
        );

        Self {
            manager,
            identity,
            route,
            start_path: start_path.to_string(),
            tx,
            rx,
        }
    }

    pub fn identity(&self) -> &CredentialStore {
        &self.identity
    }

    pub fn manager(&self) -> &SessionLifecycleManager<TokioClock> {
        &self.manager
    }

    pub fn start(&mut self) -> bool {
        self.manager.start()
    }

    pub fn handle(&mut self, input: SessionInput) {
        self.manager.handle(input);
    }

    /// Handle everything already queued without waiting.
    pub fn drain(&mut self) {
        while let Ok(input) = self.rx.try_recv() {
            self.manager.handle(input);
        }
    }

    pub fn apply(&mut self, command: Command) -> anyhow::Result<Flow> {
        match command {
            Command::Login { username, token } => {
                self.identity.login(&username, &token);
                // The login page redirects once credentials are in place.
                if self.route.is_on_login_page() {
                    self.route.navigate(&self.start_path);
                }
                let _ = self.tx.send(SessionInput::LoginCompleted);
            }
            Command::SignOut { reason } => match self.identity.logout(&reason) {
                Some(token) => {
                    self.manager.invalidate(token);
                }
                None => println!("not signed in"),
            },
            Command::Navigate { path } => {
                self.route.navigate(&path);
                self.manager.handle(SessionInput::Navigated);
            }
            Command::Activity(signal) => self.manager.handle(SessionInput::Signal(signal)),
            Command::Extend => self
                .manager
                .handle(SessionInput::WarningResolved(WarningOutcome::Extend)),
            Command::Logout => self
                .manager
                .handle(SessionInput::WarningResolved(WarningOutcome::Logout)),
            Command::Status => {
                let status = serde_json::to_string_pretty(&self.manager.status())?;
                println!("{status}");
                if let Some(user) = self.identity.current_user() {
                    println!("signed in as {} on {}", user.username, self.route.current());
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Supervise until `quit` or a shutdown signal.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.start();
        println!("type `help` for commands");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(input) = self.rx.recv() => self.manager.handle(input),
                line = lines.next_line(), if stdin_open => {
                    match line.context("failed to read stdin")? {
                        Some(line) => match console::parse(&line) {
                            Ok(Some(command)) => {
                                if self.apply(command)? == Flow::Quit {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => eprintln!("{e}"),
                        },
                        None => {
                            stdin_open = false;
                            tracing::info!("stdin closed, supervising until interrupted");
                        }
                    }
                }
                () = &mut shutdown => break,
            }
        }

        tracing::info!("session supervisor stopped");
        Ok(())
    }
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use warden_core::{
        ActivitySignal, BackendCall, BackendError, Phase, ScriptedBackend, TerminationReason,
    };

    fn policy() -> SessionPolicy {
        SessionPolicy {
            session_duration: Duration::from_secs(60),
            inactivity_limit: Duration::from_secs(10),
            warning_window: Duration::from_secs(5),
            ..SessionPolicy::default()
        }
    }

    fn supervisor(path: &str) -> (Supervisor, ScriptedBackend) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = ScriptedBackend::new();
        let supervisor = Supervisor::new(
            policy(),
            MemoryRoute::new(path, "/login"),
            "/home",
            Box::new(backend.clone()),
            tx,
            rx,
        );
        (supervisor, backend)
    }

    async fn wait(supervisor: &mut Supervisor, secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        tokio::task::yield_now().await;
        supervisor.drain();
    }

    fn complete(supervisor: &mut Supervisor, backend: &ScriptedBackend) {
        for response in backend.complete_pending() {
            supervisor.handle(SessionInput::BackendCompleted(response));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn login_redirects_and_arms() {
        let (mut sup, _backend) = supervisor("/login");
        sup.apply(Command::Login {
            username: "ana".into(),
            token: "abc".into(),
        })
        .expect("apply");
        sup.drain();

        assert_eq!(sup.route.current(), "/home");
        assert_eq!(sup.manager().phase(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_warns_then_closes() {
        let (mut sup, backend) = supervisor("/");
        sup.apply(Command::Login {
            username: "ana".into(),
            token: "abc".into(),
        })
        .expect("apply");
        sup.drain();

        wait(&mut sup, 11).await;
        assert_eq!(sup.manager().phase(), Phase::Warning);

        wait(&mut sup, 5).await;
        assert_eq!(sup.manager().phase(), Phase::Dormant);
        assert_eq!(
            sup.manager().last_termination(),
            Some(TerminationReason::InactivityTimeout)
        );
        assert!(!sup.identity().is_authenticated());
        assert_eq!(backend.count(BackendCall::Invalidate), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn extend_from_console() {
        let (mut sup, backend) = supervisor("/");
        sup.apply(Command::Login {
            username: "ana".into(),
            token: "abc".into(),
        })
        .expect("apply");
        sup.drain();
        wait(&mut sup, 11).await;
        assert_eq!(sup.manager().phase(), Phase::Warning);

        sup.apply(Command::Extend).expect("apply");
        complete(&mut sup, &backend);
        assert_eq!(sup.manager().phase(), Phase::Active);

        // The stale countdown never closes the extended session.
        wait(&mut sup, 6).await;
        assert_eq!(sup.manager().phase(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_keeps_session_until_absolute_deadline() {
        let (mut sup, _backend) = supervisor("/");
        sup.apply(Command::Login {
            username: "ana".into(),
            token: "abc".into(),
        })
        .expect("apply");
        sup.drain();

        for _ in 0..11 {
            wait(&mut sup, 5).await;
            sup.apply(Command::Activity(ActivitySignal::KeyPress))
                .expect("apply");
        }
        assert_eq!(sup.manager().phase(), Phase::Active);

        wait(&mut sup, 6).await;
        assert_eq!(sup.manager().phase(), Phase::Dormant);
        assert_eq!(
            sup.manager().last_termination(),
            Some(TerminationReason::ExpiredByDuration)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restored_session_validates_at_start() {
        let (mut sup, backend) = supervisor("/orders");
        backend.set_outcome(BackendCall::Validate, Err(BackendError::from_status(401)));
        sup.identity().restore("ana", "abc");

        assert!(sup.start());
        assert_eq!(backend.count(BackendCall::Validate), 1);
        complete(&mut sup, &backend);
        sup.drain();
        assert_eq!(sup.manager().phase(), Phase::Dormant);
        assert_eq!(
            sup.manager().last_termination(),
            Some(TerminationReason::InvalidSession)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn signout_stops_quietly_and_invalidates_token() {
        let (mut sup, backend) = supervisor("/");
        assert_eq!(
            sup.apply(Command::SignOut {
                reason: "User logout".into()
            })
            .expect("apply"),
            Flow::Continue
        );
        assert_eq!(backend.count(BackendCall::Invalidate), 0);

        sup.apply(Command::Login {
            username: "ana".into(),
            token: "abc".into(),
        })
        .expect("apply");
        sup.drain();
        sup.apply(Command::SignOut {
            reason: "User logout".into(),
        })
        .expect("apply");
        sup.drain();

        assert_eq!(sup.manager().phase(), Phase::Dormant);
        assert_eq!(sup.manager().last_termination(), None);
        assert!(!sup.identity().is_authenticated());
        assert!(sup.manager().status().armed_timers.is_empty());

        let invalidations: Vec<_> = backend
            .dispatched()
            .into_iter()
            .filter(|r| r.call == BackendCall::Invalidate)
            .collect();
        assert_eq!(invalidations.len(), 1);
        assert_eq!(invalidations[0].token.as_deref(), Some("Bearer abc"));
        assert_eq!(sup.apply(Command::Quit).expect("apply"), Flow::Quit);
    }
}
