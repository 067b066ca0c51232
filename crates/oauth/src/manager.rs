//! Token lifecycle: preemptive refresh, single-flight coalescing, and
//! persistence through the secret store.

use std::sync::Arc;

use {
    futures_util::future::BoxFuture,
    secrecy::{ExposeSecret, Secret},
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, info, warn},
};

use {
    mcport_common::{Error, Result, paths::now_unix},
    mcport_secrets::{OAuthCredentials, SecretStore, SecretStoreExt},
};

use crate::discovery;

/// Profile metadata emitted after a successful refresh so the caller can
/// persist it (the manager itself never touches the profile file).
#[derive(Debug, Clone)]
pub struct RefreshedMetadata {
    pub expires_at: Option<u64>,
    pub scopes: Vec<String>,
}

/// Callback invoked with fresh metadata after each successful refresh.
pub type PersistMetadata =
    Arc<dyn Fn(RefreshedMetadata) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Keeps one profile's access token warm for a bridge.
pub struct TokenManager {
    server_url: String,
    profile: String,
    http: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
    refresh_buffer_sec: u64,
    token_endpoint: RwLock<Option<String>>,
    /// Coalesces concurrent refresh attempts into one in-flight refresh.
    refresh_gate: Mutex<()>,
    on_refresh: Option<PersistMetadata>,
}

impl TokenManager {
    #[must_use]
    pub fn new(server_url: &str, profile: &str, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            server_url: server_url.to_string(),
            profile: profile.to_string(),
            http: reqwest::Client::new(),
            secrets,
            refresh_buffer_sec: mcport_common::DEFAULT_REFRESH_BUFFER_SEC,
            token_endpoint: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            on_refresh: None,
        }
    }

    #[must_use]
    pub fn with_refresh_buffer(mut self, seconds: u64) -> Self {
        self.refresh_buffer_sec = seconds;
        self
    }

    #[must_use]
    pub fn with_on_refresh(mut self, callback: PersistMetadata) -> Self {
        self.on_refresh = Some(callback);
        self
    }

    /// Whether the token is absent or within the preemption window.
    fn needs_refresh(&self, creds: &OAuthCredentials) -> bool {
        match creds.expires_at {
            // No expiry info: assume valid.
            None => false,
            Some(expires_at) => now_unix() + self.refresh_buffer_sec >= expires_at,
        }
    }

    /// Return a valid access token, refreshing preemptively when it is
    /// within the buffer of expiry. Concurrent callers share one refresh.
    pub async fn valid_token(&self) -> Result<Secret<String>> {
        let creds = self.load_credentials()?;
        if !self.needs_refresh(&creds) {
            return Ok(creds.access_token);
        }

        let _gate = self.refresh_gate.lock().await;

        // Another caller may have refreshed while we waited on the gate.
        let creds = self.load_credentials()?;
        if !self.needs_refresh(&creds) {
            debug!(profile = %self.profile, "token already refreshed by concurrent caller");
            return Ok(creds.access_token);
        }

        let refreshed = self.refresh(&creds).await?;
        Ok(refreshed.access_token)
    }

    /// Force a refresh now (used for the single retry after a 401/403).
    pub async fn refresh_now(&self) -> Result<Secret<String>> {
        let _gate = self.refresh_gate.lock().await;
        let creds = self.load_credentials()?;
        let refreshed = self.refresh(&creds).await?;
        Ok(refreshed.access_token)
    }

    fn load_credentials(&self) -> Result<OAuthCredentials> {
        self.secrets
            .get_oauth(&self.server_url, &self.profile)?
            .ok_or_else(|| {
                Error::auth(format!(
                    "no stored credentials for profile '{}' at {}; re-authenticate",
                    self.profile, self.server_url
                ))
            })
    }

    async fn token_endpoint(&self) -> Result<String> {
        if let Some(endpoint) = self.token_endpoint.read().await.clone() {
            return Ok(endpoint);
        }
        let meta = discovery::discover(&self.http, &self.server_url).await?;
        let mut slot = self.token_endpoint.write().await;
        *slot = Some(meta.token_endpoint.clone());
        Ok(meta.token_endpoint)
    }

    /// Run the refresh grant and persist the result.
    async fn refresh(&self, creds: &OAuthCredentials) -> Result<OAuthCredentials> {
        let refresh_token = creds.refresh_token.as_ref().ok_or_else(|| {
            Error::auth(format!(
                "access token for profile '{}' expired and no refresh token is stored; \
                 re-authenticate",
                self.profile
            ))
        })?;

        let endpoint = self.token_endpoint().await?;
        debug!(profile = %self.profile, endpoint = %endpoint, "refreshing access token");

        let resp = self
            .http
            .post(&endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("client_id", &creds.client_id),
            ])
            .send()
            .await
            .map_err(|e| Error::network(format!("token refresh request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body = resp.text().await.unwrap_or_default();
            warn!(profile = %self.profile, %status, "refresh token rejected");
            return Err(Error::auth(format!(
                "refresh token invalid or expired (HTTP {status}): {body}; re-authenticate"
            )));
        }
        if !status.is_success() {
            return Err(Error::network(format!(
                "token endpoint returned HTTP {status}"
            )));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::network(format!("failed to parse token response: {e}")))?;
        let refreshed = merge_token_response(creds, &payload)?;

        self.secrets
            .set_oauth(&self.server_url, &self.profile, &refreshed)?;
        info!(profile = %self.profile, "access token refreshed");

        if let Some(on_refresh) = &self.on_refresh {
            let metadata = RefreshedMetadata {
                expires_at: refreshed.expires_at,
                scopes: refreshed
                    .scope
                    .as_deref()
                    .map(|s| s.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
            };
            if let Err(e) = on_refresh(metadata).await {
                warn!(profile = %self.profile, error = %e, "failed to persist profile metadata");
            }
        }

        Ok(refreshed)
    }
}

/// Fold a token-endpoint response into the stored credentials: a missing
/// `refresh_token` keeps the old one, a missing `scope` keeps the old scope.
fn merge_token_response(
    current: &OAuthCredentials,
    payload: &serde_json::Value,
) -> Result<OAuthCredentials> {
    let access_token = payload["access_token"]
        .as_str()
        .ok_or_else(|| Error::auth("token response is missing access_token"))?
        .to_string();

    let expires_at = payload["expires_in"]
        .as_u64()
        .map(|secs| now_unix() + secs);

    Ok(OAuthCredentials {
        client_id: current.client_id.clone(),
        client_secret: current.client_secret.clone(),
        access_token: Secret::new(access_token),
        refresh_token: payload["refresh_token"]
            .as_str()
            .map(|s| Secret::new(s.to_string()))
            .or_else(|| current.refresh_token.clone()),
        token_type: payload["token_type"]
            .as_str()
            .unwrap_or(&current.token_type)
            .to_string(),
        expires_at,
        scope: payload["scope"]
            .as_str()
            .map(str::to_string)
            .or_else(|| current.scope.clone()),
    })
}
