//! Runtime configuration: TOML file plus environment overrides.
//!
//! Every section and field is optional; an absent file means defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use warden_core::{PolicyConfig, PolicyError, SessionPolicy};

/// Environment variable that replaces `backend.base_url`.
pub const API_URL_ENV: &str = "WARDEN_API_URL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WardenConfig {
    pub session: PolicyConfig,
    pub backend: BackendConfig,
    pub navigation: NavigationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Upper bound for the fire-and-forget logout call.
    pub invalidate_timeout_ms: u64,
    pub validate_path: String,
    pub extend_path: String,
    pub logout_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            request_timeout_ms: 10_000,
            invalidate_timeout_ms: 5_000,
            validate_path: "/auth/validate-session".to_string(),
            extend_path: "/auth/extend-session".to_string(),
            logout_path: "/auth/logout".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn invalidate_timeout(&self) -> Duration {
        Duration::from_millis(self.invalidate_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NavigationConfig {
    pub login_path: String,
    pub start_path: String,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            start_path: "/".to_string(),
        }
    }
}

impl WardenConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load from `path` (defaults when `None`), then apply the process
    /// environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|url| !url.trim().is_empty()) {
            tracing::debug!("backend base url overridden by {API_URL_ENV}");
            self.backend.base_url = url;
        }
    }

    pub fn policy(&self) -> Result<SessionPolicy, PolicyError> {
        self.session.clone().into_policy()
    }
}
