//! Secret storage facade over the OS keychain.
//!
//! Three namespaces share one keychain service:
//! - `auth:<serverUrl>:<profile>` — OAuth credentials
//! - `session:<name>:headers` — per-session HTTP headers
//! - `session:<name>:proxy-bearer` — proxy bearer token
//!
//! Secrets never touch disk files; this module is the only place allowed to
//! hold secret material beyond a single request.

use std::collections::BTreeMap;

use {
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

use mcport_common::{Error, Result};

use crate::types::OAuthCredentials;

const KEYCHAIN_SERVICE: &str = "mcport";

/// Key for OAuth credentials of a profile at a server.
#[must_use]
pub fn oauth_key(server_url: &str, profile: &str) -> String {
    format!("auth:{server_url}:{profile}")
}

/// Key for a session's HTTP headers.
#[must_use]
pub fn headers_key(session: &str) -> String {
    format!("session:{session}:headers")
}

/// Key for a session's proxy bearer token.
#[must_use]
pub fn proxy_bearer_key(session: &str) -> String {
    format!("session:{session}:proxy-bearer")
}

/// Opaque key-value secret storage.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

// ── Typed accessors ─────────────────────────────────────────────────────────

/// Typed get/set/delete for the three secret namespaces.
pub trait SecretStoreExt: SecretStore {
    fn get_oauth(&self, server_url: &str, profile: &str) -> Result<Option<OAuthCredentials>> {
        match self.get(&oauth_key(server_url, profile))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_oauth(
        &self,
        server_url: &str,
        profile: &str,
        creds: &OAuthCredentials,
    ) -> Result<()> {
        let raw = serde_json::to_string(creds)?;
        self.set(&oauth_key(server_url, profile), &raw)
    }

    fn delete_oauth(&self, server_url: &str, profile: &str) -> Result<()> {
        self.delete(&oauth_key(server_url, profile))
    }

    fn get_headers(&self, session: &str) -> Result<Option<BTreeMap<String, String>>> {
        match self.get(&headers_key(session))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_headers(&self, session: &str, headers: &BTreeMap<String, String>) -> Result<()> {
        let raw = serde_json::to_string(headers)?;
        self.set(&headers_key(session), &raw)
    }

    fn get_proxy_bearer(&self, session: &str) -> Result<Option<Secret<String>>> {
        Ok(self.get(&proxy_bearer_key(session))?.map(Secret::new))
    }

    fn set_proxy_bearer(&self, session: &str, bearer: &Secret<String>) -> Result<()> {
        self.set(&proxy_bearer_key(session), bearer.expose_secret())
    }

    /// Remove every secret belonging to a session (headers + proxy bearer).
    fn delete_session_secrets(&self, session: &str) -> Result<()> {
        self.delete(&headers_key(session))?;
        self.delete(&proxy_bearer_key(session))
    }
}

impl<S: SecretStore + ?Sized> SecretStoreExt for S {}

// ── Keychain-backed implementation ──────────────────────────────────────────

/// Secret store backed by the OS-native keychain (macOS Keychain, Windows
/// Credential Manager, Linux Secret Service).
pub struct KeychainSecretStore {
    service: String,
}

impl KeychainSecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            service: KEYCHAIN_SERVICE.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| Error::client(format!("failed to access keychain: {e}")))
    }
}

impl Default for KeychainSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeychainSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => {
                debug!(key, "secret loaded from keychain");
                Ok(Some(value))
            },
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::client(format!(
                "failed to read secret '{key}': {e}"
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| Error::client(format!("failed to store secret '{key}': {e}")))?;
        debug!(key, "secret stored in keychain");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::client(format!(
                "failed to delete secret '{key}': {e}"
            ))),
        }
    }
}

// ── In-memory implementation (tests, ephemeral runs) ────────────────────────

/// Process-local secret store for tests and ephemeral tooling.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: std::sync::Mutex<BTreeMap<String, String>>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().expect("poisoned").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().expect("poisoned").remove(key);
        Ok(())
    }
}
