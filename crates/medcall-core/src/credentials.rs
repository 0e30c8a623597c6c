use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::errors::CallError;
use crate::settings::CallSettings;

/// Short-lived join credentials for a single participant in a single session.
///
/// Created once per join attempt and never persisted.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredentials {
    pub transport_app_id: String,
    pub token: String,
    pub channel_name: String,
    pub participant_identity: String,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("transport_app_id", &self.transport_app_id)
            .field("token", &"<redacted>")
            .field("channel_name", &self.channel_name)
            .field("participant_identity", &self.participant_identity)
            .finish()
    }
}

/// Source of join credentials, keyed by session identifier.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn request_credentials(
        &self,
        session_id: &str,
        display_name: &str,
    ) -> Result<SessionCredentials, CallError>;
}

/// Requests credentials from the token broker over HTTP.
pub struct TokenBrokerClient {
    http: reqwest::Client,
    base_url: Url,
    bearer: Option<String>,
}

impl TokenBrokerClient {
    /// `broker_url` is the broker's API root, e.g. `https://broker.example.com/api`.
    pub fn new(broker_url: &str, timeout: Duration) -> Result<Self, CallError> {
        let mut base_url = Url::parse(broker_url.trim()).map_err(|e| {
            CallError::TokenAcquisitionFailed(format!("invalid broker url '{broker_url}': {e}"))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CallError::TokenAcquisitionFailed(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            bearer: None,
        })
    }

    /// Build from stored settings; fails if no broker URL is configured.
    pub fn from_settings(settings: &CallSettings) -> Result<Self, CallError> {
        let broker_url = settings.broker_url.as_deref().ok_or_else(|| {
            CallError::TokenAcquisitionFailed("no token broker configured".into())
        })?;
        Self::new(broker_url, settings.token_request_timeout())
    }

    /// Attach the caller's bearer credential issued by the identity service.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    fn token_url(&self, session_id: &str, display_name: &str) -> Result<Url, CallError> {
        let relative = format!("sessions/{}/token", urlencoding::encode(session_id));
        let mut url = self
            .base_url
            .join(&relative)
            .map_err(|e| CallError::TokenAcquisitionFailed(format!("token url: {e}")))?;
        if !display_name.is_empty() {
            url.query_pairs_mut().append_pair("display_name", display_name);
        }
        Ok(url)
    }
}

#[async_trait]
impl CredentialProvider for TokenBrokerClient {
    async fn request_credentials(
        &self,
        session_id: &str,
        display_name: &str,
    ) -> Result<SessionCredentials, CallError> {
        let url = self.token_url(session_id, display_name)?;
        tracing::info!(session_id, "requesting session credentials from {}", url.path());

        let mut request = self.http.get(url);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| CallError::TokenAcquisitionFailed(e.to_string()))?;

        let status = resp.status();
        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        ) {
            return Err(CallError::AuthenticationInvalid(format!(
                "token broker returned status {status}"
            )));
        }
        if !status.is_success() {
            return Err(CallError::TokenAcquisitionFailed(format!(
                "token broker returned status {status}"
            )));
        }

        let credentials: SessionCredentials = resp
            .json()
            .await
            .map_err(|e| CallError::TokenAcquisitionFailed(format!("invalid broker response: {e}")))?;

        if credentials.token.is_empty() || credentials.channel_name.is_empty() {
            return Err(CallError::TokenAcquisitionFailed(
                "broker response is missing token or channel".into(),
            ));
        }

        tracing::info!(
            session_id,
            identity = %credentials.participant_identity,
            "session credentials issued"
        );
        Ok(credentials)
    }
}
