//! Credential store for the terminal client.
//!
//! Wraps the in-memory identity and announces logins and logouts on the
//! session event bus. It also listens for `logout-requested` itself, so a
//! termination decided by the lifecycle manager clears the credentials here.

use warden_core::{
    EventKind, IdentityHolder, MemoryIdentity, SessionEvent, SessionEventBus, User,
};

#[derive(Debug, Clone)]
pub struct CredentialStore {
    inner: MemoryIdentity,
    bus: SessionEventBus,
}

impl CredentialStore {
    pub fn new(bus: SessionEventBus) -> Self {
        let inner = MemoryIdentity::new();
        let holder = inner.clone();
        bus.subscribe(EventKind::LogoutRequested, move |_| {
            holder.clear_credentials();
        });
        Self { inner, bus }
    }

    /// Credentials that survived a restart. Does not publish `login-succeeded`;
    /// the manager picks them up at start.
    pub fn restore(&self, username: &str, token: &str) {
        self.inner.sign_in_as(username, bearer(token));
        tracing::info!("restored credentials for {username}");
    }

    pub fn login(&self, username: &str, token: &str) {
        self.inner.sign_in_as(username, bearer(token));
        tracing::info!("{username} signed in");
        self.bus.publish(SessionEvent::LoginSucceeded);
    }

    /// User-initiated logout. Returns the token that was given up so the
    /// caller can invalidate it server-side; `None` when nobody was signed in.
    pub fn logout(&self, reason: &str) -> Option<String> {
        let token = self.inner.token()?;
        self.bus.publish(SessionEvent::LogoutRequested {
            reason: reason.to_string(),
        });
        Some(token)
    }
}

impl IdentityHolder for CredentialStore {
    fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    fn current_user(&self) -> Option<User> {
        self.inner.current_user()
    }

    fn token(&self) -> Option<String> {
        self.inner.token()
    }

    fn clear_credentials(&self) {
        self.inner.clear_credentials();
    }
}

/// The backend expects the full `Authorization` value.
fn bearer(token: &str) -> String {
    let token = token.trim();
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}
