//! Auth-profile metadata store (`auth-profiles.json`).
//!
//! Holds everything about a profile except token material, which stays in
//! the secret store.

use std::{
    path::PathBuf,
    time::Duration,
};

use tracing::{debug, info};

use mcport_common::{Error, Result, paths::now_unix};

use crate::{
    file_io::{read_json_or_default, with_lock, write_json_atomic},
    types::{AuthProfile, ProfilesFile},
};

/// Handle to `auth-profiles.json`. Same locking and atomic-write discipline
/// as the session registry.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl ProfileStore {
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Duration::from_millis(mcport_common::DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn default_location() -> Self {
        Self::open(mcport_common::paths::profiles_file())
    }

    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&std::path::Path, Duration) -> Result<R> + Send + 'static,
    {
        let path = self.path.clone();
        let timeout = self.lock_timeout;
        tokio::task::spawn_blocking(move || f(&path, timeout))
            .await
            .map_err(|e| Error::client(format!("profile store task panicked: {e}")))?
    }

    pub async fn get(&self, server_url: &str, name: &str) -> Result<Option<AuthProfile>> {
        let (server_url, name) = (server_url.to_string(), name.to_string());
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let file: ProfilesFile = read_json_or_default(path);
                Ok(file
                    .profiles
                    .get(&server_url)
                    .and_then(|m| m.get(&name))
                    .cloned())
            })
        })
        .await
    }

    /// Insert or replace a profile.
    pub async fn save(&self, profile: AuthProfile) -> Result<()> {
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let mut file: ProfilesFile = read_json_or_default(path);
                info!(profile = %profile.name, server = %profile.server_url, "saving auth profile");
                file.profiles
                    .entry(profile.server_url.clone())
                    .or_default()
                    .insert(profile.name.clone(), profile);
                write_json_atomic(path, &file)
            })
        })
        .await
    }

    /// Update profile metadata after a token refresh: new expiry, scopes,
    /// and the authenticated-at stamp, applied atomically.
    pub async fn record_refresh(
        &self,
        server_url: &str,
        name: &str,
        expires_at: Option<u64>,
        scopes: Vec<String>,
    ) -> Result<()> {
        let (server_url, name) = (server_url.to_string(), name.to_string());
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let mut file: ProfilesFile = read_json_or_default(path);
                let profile = file
                    .profiles
                    .get_mut(&server_url)
                    .and_then(|m| m.get_mut(&name))
                    .ok_or_else(|| {
                        Error::client(format!("no such auth profile: {name} @ {server_url}"))
                    })?;
                profile.expires_at = expires_at;
                if !scopes.is_empty() {
                    profile.scopes = scopes;
                }
                profile.authenticated_at = Some(now_unix());
                debug!(profile = %name, server = %server_url, "recorded token refresh");
                write_json_atomic(path, &file)
            })
        })
        .await
    }

    pub async fn delete(&self, server_url: &str, name: &str) -> Result<bool> {
        let (server_url, name) = (server_url.to_string(), name.to_string());
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let mut file: ProfilesFile = read_json_or_default(path);
                let mut existed = false;
                let mut now_empty = false;
                if let Some(per_server) = file.profiles.get_mut(&server_url) {
                    existed = per_server.remove(&name).is_some();
                    now_empty = per_server.is_empty();
                }
                if now_empty {
                    file.profiles.remove(&server_url);
                }
                if existed {
                    write_json_atomic(path, &file)?;
                }
                Ok(existed)
            })
        })
        .await
    }

    /// All profiles, flattened.
    pub async fn list(&self) -> Result<Vec<AuthProfile>> {
        self.blocking(|path, timeout| {
            with_lock(path, timeout, || {
                let file: ProfilesFile = read_json_or_default(path);
                Ok(file
                    .profiles
                    .into_values()
                    .flat_map(|per_server| per_server.into_values())
                    .collect())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::AuthType,
    };

    fn temp_store() -> (ProfileStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("auth-profiles.json"));
        (store, dir)
    }

    fn profile(name: &str, server: &str) -> AuthProfile {
        AuthProfile {
            name: name.into(),
            server_url: server.into(),
            auth_type: AuthType::OAuth,
            oauth_issuer: Some("https://auth.example.com".into()),
            scopes: vec!["read".into()],
            expires_at: Some(1_700_000_000),
            authenticated_at: None,
        }
    }

    #[tokio::test]
    async fn save_get_roundtrip() {
        let (store, _dir) = temp_store();
        store
            .save(profile("default", "https://mcp.example.com"))
            .await
            .unwrap();

        let loaded = store
            .get("https://mcp.example.com", "default")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.auth_type, AuthType::OAuth);
        assert_eq!(loaded.scopes, vec!["read"]);
    }

    #[tokio::test]
    async fn record_refresh_updates_metadata() {
        let (store, _dir) = temp_store();
        store
            .save(profile("default", "https://mcp.example.com"))
            .await
            .unwrap();

        store
            .record_refresh(
                "https://mcp.example.com",
                "default",
                Some(2_000_000_000),
                vec!["read".into(), "write".into()],
            )
            .await
            .unwrap();

        let loaded = store
            .get("https://mcp.example.com", "default")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.expires_at, Some(2_000_000_000));
        assert_eq!(loaded.scopes.len(), 2);
        assert!(loaded.authenticated_at.is_some());
    }

    #[tokio::test]
    async fn record_refresh_missing_profile_errors() {
        let (store, _dir) = temp_store();
        let err = store
            .record_refresh("https://x", "ghost", None, vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such auth profile"));
    }

    #[tokio::test]
    async fn delete_and_list() {
        let (store, _dir) = temp_store();
        store.save(profile("a", "https://one.example.com")).await.unwrap();
        store.save(profile("b", "https://two.example.com")).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
        assert!(store.delete("https://one.example.com", "a").await.unwrap());
        assert!(!store.delete("https://one.example.com", "a").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn profile_file_never_contains_tokens() {
        let (store, dir) = temp_store();
        store
            .save(profile("default", "https://mcp.example.com"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("auth-profiles.json")).unwrap();
        assert!(!raw.to_lowercase().contains("token"));
        assert!(raw.contains("expiresAt"));
    }
}
