//! CLI-side bridge lifecycle: discover, spawn, probe, and stop bridge
//! daemons.

use std::{
    fs,
    path::PathBuf,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use tracing::{debug, info, warn};

use {
    mcport_common::{Error, Result, paths},
    mcport_registry::{SessionRecord, SessionRegistry, SessionStatus, pid_alive},
    mcport_secrets::SecretStore,
};

use crate::ipc_client::IpcClient;

/// How long to wait for a freshly spawned bridge to announce itself.
const SPAWN_WAIT: Duration = Duration::from_secs(10);
/// Liveness probe deadline for an allegedly-running bridge.
const PROBE_DEADLINE: Duration = Duration::from_millis(500);

pub struct BridgeManager {
    registry: SessionRegistry,
    secrets: Arc<dyn SecretStore>,
}

impl BridgeManager {
    #[must_use]
    pub fn new(registry: SessionRegistry, secrets: Arc<dyn SecretStore>) -> Self {
        Self { registry, secrets }
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn secrets(&self) -> Arc<dyn SecretStore> {
        Arc::clone(&self.secrets)
    }

    /// Ensure a live bridge serves `name`, spawning one if needed. Returns
    /// the current record (with a fresh pid when respawned).
    pub async fn ensure_bridge_healthy(&self, name: &str) -> Result<SessionRecord> {
        let record = self
            .registry
            .get(name)
            .await?
            .ok_or_else(|| Error::client(format!("no such session: {name}")))?;

        if record.status == SessionStatus::Expired {
            return Err(Error::session_expired(format!(
                "session '{name}' has expired; run `mcport restart {name}`"
            )));
        }

        if let (Some(pid), Some(socket)) = (record.pid, record.socket_path.clone()) {
            if pid_alive(pid) && IpcClient::new(&socket).ping(PROBE_DEADLINE).await {
                debug!(session = name, pid, "bridge is healthy");
                return Ok(record);
            }
            debug!(session = name, pid, "bridge unresponsive, respawning");
        }

        self.spawn_bridge(name).await
    }

    /// Spawn a bridge daemon for `name` and wait until it announces its pid
    /// and socket in the registry and answers a ping.
    pub async fn spawn_bridge(&self, name: &str) -> Result<SessionRecord> {
        let exe = std::env::current_exe()
            .map_err(|e| Error::client(format!("cannot locate own executable: {e}")))?;
        let log_path = paths::log_path(name);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log_file = fs::File::create(&log_path)?;
        let log_clone = log_file.try_clone()?;

        info!(session = name, log = %log_path.display(), "spawning bridge daemon");
        let mut command = std::process::Command::new(exe);
        command
            .arg("bridge-daemon")
            .arg("--session")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_clone));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Detach from the CLI's process group so the bridge outlives it.
            command.process_group(0);
        }
        let child = command
            .spawn()
            .map_err(|e| Error::client(format!("failed to spawn bridge daemon: {e}")))?;
        let spawned_pid = child.id();

        // Poll for the readiness announcement.
        let deadline = tokio::time::Instant::now() + SPAWN_WAIT;
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;

            let record = self.registry.get(name).await?;
            if let Some(record) = &record {
                if record.status == SessionStatus::Expired {
                    return Err(Error::session_expired(format!(
                        "session '{name}' has expired; run `mcport restart {name}`"
                    )));
                }
                if let (Some(pid), Some(socket)) = (record.pid, record.socket_path.clone()) {
                    if pid == spawned_pid
                        && IpcClient::new(&socket).ping(PROBE_DEADLINE).await
                    {
                        info!(session = name, pid, "bridge is up");
                        return Ok(record.clone());
                    }
                }
            }

            if !pid_alive(spawned_pid) {
                return Err(Error::network(format!(
                    "bridge daemon for '{name}' exited during startup; see {}",
                    log_path.display()
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::network(format!(
                    "bridge daemon for '{name}' did not become ready within {}s; see {}",
                    SPAWN_WAIT.as_secs(),
                    log_path.display()
                )));
            }
        }
    }

    /// Stop a session's bridge: polite IPC shutdown, then SIGTERM, then
    /// SIGKILL. Idempotent; stopping a stopped session succeeds.
    pub async fn stop_bridge(&self, name: &str) -> Result<()> {
        let Some(record) = self.registry.get(name).await? else {
            return Ok(());
        };
        let socket = record
            .socket_path
            .clone()
            .unwrap_or_else(|| paths::socket_path(name));

        let mut stopped = false;
        if record.pid.is_some_and(pid_alive) {
            let client = IpcClient::new(&socket).with_timeout(Duration::from_secs(2));
            match client.request("shutdown", None).await {
                Ok(_) => {
                    debug!(session = name, "bridge acknowledged shutdown");
                    stopped = self.wait_for_exit(record.pid, Duration::from_secs(2)).await;
                },
                Err(e) => debug!(session = name, error = %e, "IPC shutdown failed"),
            }
        } else {
            stopped = true;
        }

        #[cfg(unix)]
        if !stopped {
            if let Some(pid) = record.pid {
                use nix::{
                    sys::signal::{Signal, kill},
                    unistd::Pid,
                };
                warn!(session = name, pid, "escalating to SIGTERM");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                if !self.wait_for_exit(Some(pid), Duration::from_secs(3)).await {
                    warn!(session = name, pid, "escalating to SIGKILL");
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                    self.wait_for_exit(Some(pid), Duration::from_secs(1)).await;
                }
            }
        }

        crate::daemon::remove_stale_socket(&socket);
        // Best effort: the record may already be gone.
        let _ = self.registry.update(name, |r| r.pid = None).await;
        Ok(())
    }

    /// Stop the bridge, clear the negotiated session, and spawn a fresh
    /// daemon (fresh `MCP-Session-Id`).
    pub async fn restart_bridge(&self, name: &str) -> Result<SessionRecord> {
        self.registry
            .get(name)
            .await?
            .ok_or_else(|| Error::client(format!("no such session: {name}")))?;

        self.stop_bridge(name).await?;
        self.registry
            .update(name, |r| {
                r.mcp_session_id = None;
                r.protocol_version = None;
                r.status = SessionStatus::Live;
            })
            .await?;
        self.spawn_bridge(name).await
    }

    async fn wait_for_exit(&self, pid: Option<u32>, budget: Duration) -> bool {
        let Some(pid) = pid else {
            return true;
        };
        let deadline = tokio::time::Instant::now() + budget;
        while tokio::time::Instant::now() < deadline {
            if !pid_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        !pid_alive(pid)
    }

    /// Socket path for a session (registry value or the default layout).
    #[must_use]
    pub fn socket_for(record: &SessionRecord) -> PathBuf {
        record
            .socket_path
            .clone()
            .unwrap_or_else(|| paths::socket_path(&record.name))
    }
}
