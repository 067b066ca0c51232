//! The session registry: single source of truth for session metadata,
//! mutated concurrently by bridges and CLI invocations.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tracing::{debug, info, warn};

use {
    mcport_common::{Error, Result, paths::now_unix},
    mcport_secrets::{SecretStore, SecretStoreExt},
};

use crate::{
    file_io::{read_json_or_default, with_lock, write_json_atomic},
    types::{RegistryFile, SessionRecord, SessionStatus},
};

/// Counts returned by [`SessionRegistry::consolidate`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConsolidateReport {
    /// Records whose bridge PID was found dead this sweep.
    pub crashed: usize,
    /// Expired records removed (only when `clean_expired` was set).
    pub expired: usize,
    /// Names of records removed by the sweep.
    pub removed: Vec<String>,
}

/// Handle to `sessions.json`. Cheap to clone; all I/O happens under the
/// advisory file lock on a blocking thread.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    path: PathBuf,
    lock_timeout: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Duration::from_millis(mcport_common::DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    /// Registry at the default data-dir location.
    #[must_use]
    pub fn default_location() -> Self {
        Self::open(mcport_common::paths::sessions_file())
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Path, Duration) -> Result<R> + Send + 'static,
    {
        let path = self.path.clone();
        let timeout = self.lock_timeout;
        tokio::task::spawn_blocking(move || f(&path, timeout))
            .await
            .map_err(|e| Error::client(format!("registry task panicked: {e}")))?
    }

    /// Load the whole registry (read-only snapshot).
    pub async fn load(&self) -> Result<RegistryFile> {
        self.blocking(|path, timeout| {
            with_lock(path, timeout, || Ok(read_json_or_default(path)))
        })
        .await
    }

    /// Look up one record by name.
    pub async fn get(&self, name: &str) -> Result<Option<SessionRecord>> {
        let name = name.to_string();
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let file: RegistryFile = read_json_or_default(path);
                Ok(file.sessions.get(&name).cloned())
            })
        })
        .await
    }

    /// Insert or replace a record. Bumps `updatedAt`.
    pub async fn save(&self, mut record: SessionRecord) -> Result<()> {
        record.updated_at = now_unix();
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let mut file: RegistryFile = read_json_or_default(path);
                debug!(session = %record.name, "saving session record");
                file.sessions.insert(record.name.clone(), record);
                write_json_atomic(path, &file)
            })
        })
        .await
    }

    /// Apply a mutation to an existing record under the lock. Bumps
    /// `updatedAt` and returns the record as written.
    pub async fn update<F>(&self, name: &str, mutate: F) -> Result<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord) + Send + 'static,
    {
        let name = name.to_string();
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let mut file: RegistryFile = read_json_or_default(path);
                let record = file
                    .sessions
                    .get_mut(&name)
                    .ok_or_else(|| Error::client(format!("no such session: {name}")))?;
                mutate(record);
                record.updated_at = now_unix();
                let updated = record.clone();
                write_json_atomic(path, &file)?;
                Ok(updated)
            })
        })
        .await
    }

    /// Remove a record. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let mut file: RegistryFile = read_json_or_default(path);
                let existed = file.sessions.remove(&name).is_some();
                if existed {
                    info!(session = %name, "removed session record");
                    write_json_atomic(path, &file)?;
                }
                Ok(existed)
            })
        })
        .await
    }

    /// Reconcile records with observed process liveness. Runs on every CLI
    /// invocation.
    ///
    /// 1. Records with a dead `pid` lose the pid and become `crashed`
    ///    (unless already `expired`).
    /// 2. With `clean_expired`, expired records are removed along with their
    ///    socket files and session secrets.
    pub async fn consolidate(
        &self,
        clean_expired: bool,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<ConsolidateReport> {
        self.blocking(move |path, timeout| {
            with_lock(path, timeout, || {
                let mut file: RegistryFile = read_json_or_default(path);
                let mut report = ConsolidateReport::default();
                let mut dirty = false;

                for record in file.sessions.values_mut() {
                    if let Some(pid) = record.pid {
                        if !pid_alive(pid) {
                            debug!(session = %record.name, pid, "bridge process is gone");
                            record.pid = None;
                            if record.status != SessionStatus::Expired {
                                record.status = SessionStatus::Crashed;
                            }
                            record.updated_at = now_unix();
                            report.crashed += 1;
                            dirty = true;
                        }
                    }
                }

                if clean_expired {
                    let expired: Vec<String> = file
                        .sessions
                        .values()
                        .filter(|r| r.status == SessionStatus::Expired)
                        .map(|r| r.name.clone())
                        .collect();
                    for name in expired {
                        let Some(record) = file.sessions.remove(&name) else {
                            continue;
                        };
                        if let Some(socket) = &record.socket_path {
                            if let Err(e) = std::fs::remove_file(socket) {
                                if e.kind() != std::io::ErrorKind::NotFound {
                                    warn!(session = %name, error = %e, "failed to remove socket file");
                                }
                            }
                        }
                        if let Err(e) = secrets.delete_session_secrets(&name) {
                            warn!(session = %name, error = %e, "failed to remove session secrets");
                        }
                        info!(session = %name, "removed expired session");
                        report.expired += 1;
                        report.removed.push(name);
                        dirty = true;
                    }
                }

                if dirty {
                    write_json_atomic(path, &file)?;
                }
                Ok(report)
            })
        })
        .await
    }
}

/// Probe whether a process is alive without signalling it.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use mcport_secrets::MemorySecretStore;

    use {
        super::*,
        crate::types::{TransportConfig, validate_session_name},
    };

    fn temp_registry() -> (SessionRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let reg = SessionRegistry::open(dir.path().join("sessions.json"));
        (reg, dir)
    }

    fn stdio_record(name: &str) -> SessionRecord {
        SessionRecord::new(name, &TransportConfig::Stdio {
            command: "echo".into(),
            args: vec![],
            env: BTreeMap::new(),
        })
    }

    #[tokio::test]
    async fn save_get_roundtrip() {
        let (reg, _dir) = temp_registry();
        let rec = stdio_record("s1");
        reg.save(rec.clone()).await.unwrap();

        let loaded = reg.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.name, rec.name);
        assert_eq!(loaded.transport, rec.transport);
        assert_eq!(loaded.status, SessionStatus::Live);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (reg, _dir) = temp_registry();
        assert!(reg.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_mutates_and_bumps_timestamp() {
        let (reg, _dir) = temp_registry();
        reg.save(stdio_record("s1")).await.unwrap();

        let updated = reg
            .update("s1", |r| {
                r.pid = Some(4242);
                r.mcp_session_id = Some("abc".into());
            })
            .await
            .unwrap();
        assert_eq!(updated.pid, Some(4242));

        let loaded = reg.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.mcp_session_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn update_missing_errors() {
        let (reg, _dir) = temp_registry();
        let err = reg.update("ghost", |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("no such session"));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (reg, _dir) = temp_registry();
        reg.save(stdio_record("s1")).await.unwrap();
        assert!(reg.delete("s1").await.unwrap());
        assert!(!reg.delete("s1").await.unwrap());
    }

    #[tokio::test]
    async fn consolidate_marks_dead_pid_crashed() {
        let (reg, _dir) = temp_registry();

        // A real short-lived child gives us a guaranteed-dead PID.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        let mut rec = stdio_record("s1");
        rec.pid = Some(dead_pid);
        reg.save(rec).await.unwrap();

        let report = reg
            .consolidate(false, Arc::new(MemorySecretStore::new()))
            .await
            .unwrap();
        assert_eq!(report.crashed, 1);

        let loaded = reg.get("s1").await.unwrap().unwrap();
        assert!(loaded.pid.is_none());
        assert_eq!(loaded.status, SessionStatus::Crashed);
    }

    #[tokio::test]
    async fn consolidate_keeps_live_pid() {
        let (reg, _dir) = temp_registry();
        let mut rec = stdio_record("s1");
        rec.pid = Some(std::process::id());
        reg.save(rec).await.unwrap();

        let report = reg
            .consolidate(false, Arc::new(MemorySecretStore::new()))
            .await
            .unwrap();
        assert_eq!(report.crashed, 0);
        assert_eq!(
            reg.get("s1").await.unwrap().unwrap().pid,
            Some(std::process::id())
        );
    }

    #[tokio::test]
    async fn consolidate_preserves_expired_status() {
        let (reg, _dir) = temp_registry();

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        let mut rec = stdio_record("s1");
        rec.pid = Some(dead_pid);
        rec.status = SessionStatus::Expired;
        reg.save(rec).await.unwrap();

        reg.consolidate(false, Arc::new(MemorySecretStore::new()))
            .await
            .unwrap();
        let loaded = reg.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Expired);
        assert!(loaded.pid.is_none());
    }

    #[tokio::test]
    async fn clean_expired_removes_record_socket_and_secrets() {
        use mcport_secrets::SecretStoreExt;

        let (reg, dir) = temp_registry();
        let secrets = Arc::new(MemorySecretStore::new());

        let socket = dir.path().join("s1.sock");
        std::fs::write(&socket, b"").unwrap();
        secrets
            .set_headers("s1", &BTreeMap::from([("X".to_string(), "y".to_string())]))
            .unwrap();

        let mut rec = stdio_record("s1");
        rec.status = SessionStatus::Expired;
        rec.socket_path = Some(socket.clone());
        reg.save(rec).await.unwrap();

        let report = reg
            .consolidate(true, Arc::clone(&secrets) as Arc<dyn SecretStore>)
            .await
            .unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.removed, vec!["s1".to_string()]);
        assert!(reg.get("s1").await.unwrap().is_none());
        assert!(!socket.exists());
        assert!(secrets.get_headers("s1").unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_registry_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "{broken").unwrap();

        let reg = SessionRegistry::open(&path);
        assert!(reg.load().await.unwrap().sessions.is_empty());

        // And it recovers on the next write.
        reg.save(stdio_record("s1")).await.unwrap();
        assert!(reg.get("s1").await.unwrap().is_some());
    }

    #[test]
    fn current_process_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn name_validation_matches_registry_keys() {
        assert!(validate_session_name("ok-1").is_ok());
        assert!(validate_session_name("no/slash").is_err());
    }
}
