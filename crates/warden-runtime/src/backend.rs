//! HTTP session backend.
//!
//! Each dispatched request runs on its own task; the outcome is posted back
//! into the session input channel. Only a 401 is an auth failure, anything
//! else that is not a success (including network errors and timeouts) is
//! transient.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use tokio::sync::mpsc::UnboundedSender;
use warden_core::{
    BackendCall, BackendError, BackendRequest, BackendResponse, SessionBackend, SessionInput,
};

use crate::config::BackendConfig;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    validate_path: String,
    extend_path: String,
    logout_path: String,
    invalidate_timeout: Duration,
    http: Client,
    completions: UnboundedSender<SessionInput>,
}

impl HttpBackend {
    pub fn new(
        config: &BackendConfig,
        completions: UnboundedSender<SessionInput>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            validate_path: config.validate_path.clone(),
            extend_path: config.extend_path.clone(),
            logout_path: config.logout_path.clone(),
            invalidate_timeout: config.invalidate_timeout(),
            http,
            completions,
        })
    }

    fn url(&self, call: BackendCall) -> String {
        let path = match call {
            BackendCall::Validate => &self.validate_path,
            BackendCall::Extend => &self.extend_path,
            BackendCall::Invalidate => &self.logout_path,
        };
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Perform one call and classify the outcome.
    pub async fn call(&self, request: &BackendRequest) -> Result<(), BackendError> {
        let url = self.url(request.call);
        let mut builder = self.http.post(&url).json(&serde_json::json!({}));
        if let Some(token) = &request.token {
            builder = builder.header(AUTHORIZATION, token);
        }
        if request.call == BackendCall::Invalidate {
            builder = builder.timeout(self.invalidate_timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BackendError::from_status(status.as_u16()))
        }
    }
}

impl SessionBackend for HttpBackend {
    fn dispatch(&mut self, request: BackendRequest) {
        let backend = self.clone();
        tokio::spawn(async move {
            let result = backend.call(&request).await;
            if let Err(e) = &result {
                tracing::debug!("{} #{} failed: {e}", request.call.as_str(), request.id.0);
            }
            let response = BackendResponse { request, result };
            if backend
                .completions
                .send(SessionInput::BackendCompleted(response))
                .is_err()
            {
                tracing::debug!("backend completion dropped, session loop stopped");
            }
        });
    }
}
