//! The bridge daemon process: claims the session socket, terminates one MCP
//! transport, and serves IPC requests until shutdown, expiry, or a fatal
//! transport error.

use std::{
    fs,
    path::Path,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{UnixListener, UnixStream},
        sync::watch,
    },
    tracing::{debug, error, info, warn},
};

use {
    mcport_common::{Error, Result, paths},
    mcport_oauth::{PersistMetadata, TokenManager},
    mcport_registry::{
        ProfileStore, SessionRegistry, SessionStatus, TransportConfig,
    },
    mcport_secrets::{KeychainSecretStore, SecretStore, SecretStoreExt},
};

use crate::{
    ipc::{IpcRequest, IpcResponse, encode_line},
    service::{BridgeService, ConnectionFactory},
    state::BridgeState,
};

/// Entry point for the hidden `bridge-daemon` subcommand.
pub async fn run(session: &str) -> Result<()> {
    let registry = SessionRegistry::default_location();
    let profiles = ProfileStore::default_location();
    let secrets: Arc<dyn SecretStore> = Arc::new(KeychainSecretStore::new());
    run_with(session, registry, profiles, secrets).await
}

/// Daemon main with injectable stores.
pub async fn run_with(
    session: &str,
    registry: SessionRegistry,
    profiles: ProfileStore,
    secrets: Arc<dyn SecretStore>,
) -> Result<()> {
    let record = registry
        .get(session)
        .await?
        .ok_or_else(|| Error::client(format!("no such session: {session}")))?;
    let registry =
        registry.with_lock_timeout(Duration::from_millis(record.options.lock_timeout_ms));

    let socket_path = record
        .socket_path
        .clone()
        .unwrap_or_else(|| paths::socket_path(session));
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
        }
    }

    // Exclusive claim on the socket path: a second bridge for the same
    // session must refuse to start.
    let lock_path = socket_path.with_extension("sock.lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    let mut socket_lock = fd_lock::RwLock::new(lock_file);
    let _socket_guard = socket_lock.try_write().map_err(|_| {
        Error::client(format!(
            "another bridge is already bound for session '{session}'"
        ))
    })?;
    // Any leftover socket file belongs to a dead bridge now.
    let _ = fs::remove_file(&socket_path);

    // Token manager wired to profile metadata persistence.
    let auth = build_token_manager(
        &record.transport,
        record.profile_name.as_deref(),
        &profiles,
        &record,
        Arc::clone(&secrets),
    );

    // Real header values never live in the registry.
    let headers = secrets.get_headers(session)?.unwrap_or_default();

    let factory = ConnectionFactory {
        transport: record.transport.clone(),
        headers,
        auth,
        timeout: Duration::from_millis(record.options.timeout_ms),
    };

    // Resume the server session a previous bridge established, HTTP only.
    let resume = match &record.transport {
        TransportConfig::Http { .. } => record
            .mcp_session_id
            .clone()
            .map(|sid| (sid, record.protocol_version.clone())),
        TransportConfig::Stdio { .. } => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = match BridgeService::start(
        session,
        registry.clone(),
        Box::new(factory),
        Duration::from_millis(record.options.ttl_ms),
        resume,
        shutdown_tx,
    )
    .await
    {
        Ok(service) => service,
        Err(e) => {
            if matches!(e, Error::SessionExpired(_)) {
                let _ = registry
                    .update(session, |r| r.status = SessionStatus::Expired)
                    .await;
            }
            error!(error = %e, "bridge handshake failed");
            return Err(e);
        },
    };

    // Announce readiness: the bridge manager polls for pid + socket.
    let (session_id, protocol_version) = service.session_identity().await;
    let announce_socket = socket_path.clone();
    registry
        .update(session, move |r| {
            r.pid = Some(std::process::id());
            r.socket_path = Some(announce_socket);
            if session_id.is_some() {
                r.mcp_session_id = session_id;
            }
            if protocol_version.is_some() {
                r.protocol_version = protocol_version;
            }
            r.status = SessionStatus::Live;
        })
        .await?;

    // Optional proxy server inside the bridge.
    if let Some(proxy_config) = record.proxy_config.clone() {
        let bearer = secrets.get_proxy_bearer(session)?;
        let proxy_service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = crate::proxy::serve(proxy_config, bearer, proxy_service).await {
                error!(error = %e, "proxy server failed");
            }
        });
    }

    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| Error::client(format!("failed to bind {}: {e}", socket_path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o600))?;
    }
    info!(session, socket = %socket_path.display(), "bridge ready");

    serve_ipc(listener, Arc::clone(&service), shutdown_rx).await;

    // Drain outstanding IPC work, then tear down.
    wait_for_drain(&service, Duration::from_secs(5)).await;
    if service.state.get() != BridgeState::Expired {
        service.state.set(BridgeState::Stopping);
    }
    service.shutdown_connection().await;
    let _ = fs::remove_file(&socket_path);
    // The record may already be gone (`close` deletes it first).
    let _ = registry.update(session, |r| r.pid = None).await;

    info!(session, "bridge stopped");
    Ok(())
}

fn build_token_manager(
    transport: &TransportConfig,
    profile_name: Option<&str>,
    profiles: &ProfileStore,
    record: &mcport_registry::SessionRecord,
    secrets: Arc<dyn SecretStore>,
) -> Option<Arc<TokenManager>> {
    let TransportConfig::Http { url, .. } = transport else {
        return None;
    };
    let profile = profile_name?;

    let persist: PersistMetadata = {
        let profiles = profiles.clone();
        let url = url.clone();
        let profile = profile.to_string();
        Arc::new(move |meta| {
            let profiles = profiles.clone();
            let url = url.clone();
            let profile = profile.clone();
            Box::pin(async move {
                profiles
                    .record_refresh(&url, &profile, meta.expires_at, meta.scopes)
                    .await
            })
        })
    };

    Some(Arc::new(
        TokenManager::new(url, profile, secrets)
            .with_refresh_buffer(record.options.refresh_buffer_sec)
            .with_on_refresh(persist),
    ))
}

/// Accept IPC connections until shutdown is signalled or a termination
/// signal arrives.
pub async fn serve_ipc(
    listener: UnixListener,
    service: Arc<BridgeService>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    #[cfg(unix)]
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");

    loop {
        #[cfg(unix)]
        let signal_fired = async {
            tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            }
        };
        #[cfg(not(unix))]
        let signal_fired = std::future::pending::<&str>();

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            },
            name = signal_fired => {
                info!(signal = name, "termination signal received");
                break;
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(Arc::clone(&service), stream));
                },
                Err(e) => {
                    warn!(error = %e, "IPC accept failed");
                },
            },
        }
    }
}

/// Serve one IPC connection: line-delimited requests, one response per
/// request, in order. Upstream work is detached so a disconnecting caller
/// cannot cancel it.
async fn handle_connection(service: Arc<BridgeService>, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: IpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                let err = Error::client(format!("malformed IPC request: {e}"));
                let _ = write_response(&mut write_half, &IpcResponse::err(0, &err)).await;
                continue;
            },
        };
        debug!(method = %request.method, id = request.id, "IPC request");
        let is_shutdown = request.method == "shutdown";

        service.outstanding.fetch_add(1, Ordering::SeqCst);
        let task = {
            let service = Arc::clone(&service);
            let method = request.method.clone();
            let params = request.params.clone();
            tokio::spawn(async move { service.handle_ipc(&method, params).await })
        };
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::client(format!("bridge task failed: {e}"))),
        };
        service.outstanding.fetch_sub(1, Ordering::SeqCst);

        let response = match result {
            Ok(value) => IpcResponse::ok(request.id, value),
            Err(e) => IpcResponse::err(request.id, &e),
        };
        if write_response(&mut write_half, &response).await.is_err() {
            debug!("IPC caller disconnected before response; dropping result");
            break;
        }
        if is_shutdown {
            break;
        }
    }
}

async fn write_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &IpcResponse,
) -> Result<()> {
    let line = encode_line(response)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn wait_for_drain(service: &BridgeService, budget: Duration) {
    let deadline = tokio::time::Instant::now() + budget;
    while service.outstanding.load(Ordering::SeqCst) > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!("drain budget exhausted with requests outstanding");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Remove a stale socket file if nothing is listening on it.
pub fn remove_stale_socket(path: &Path) {
    if path.exists() {
        debug!(path = %path.display(), "removing stale socket file");
        let _ = fs::remove_file(path);
    }
}
