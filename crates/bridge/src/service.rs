//! The bridge service: one rebuildable MCP connection, the list cache, and
//! the dispatch surface shared by the IPC socket and the proxy server.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    tokio::sync::{RwLock, watch},
    tracing::{debug, error, info, warn},
};

use {
    mcport_client::{
        ClientCore, ClientEvent, HttpTransport, HttpTransportOptions, ListCache, ListKind,
        McpTransport, StdioTransport, kinds_for_notification,
    },
    mcport_common::{Error, Result, paths::now_unix},
    mcport_oauth::TokenManager,
    mcport_registry::{SessionRegistry, SessionStatus, TransportConfig},
};

use crate::state::{BridgeState, StateCell};

/// Name announced in the initialize handshake.
const CLIENT_NAME: &str = "mcport";

/// Builds started, initialized client cores for one session.
pub struct ConnectionFactory {
    pub transport: TransportConfig,
    /// Real header values (resolved from the secret store).
    pub headers: BTreeMap<String, String>,
    pub auth: Option<Arc<TokenManager>>,
    pub timeout: Duration,
}

/// A live connection produced by a [`ConnectionSource`].
pub struct Connection {
    pub core: Arc<ClientCore>,
    /// Negotiated handshake result; `None` when an existing server session
    /// was resumed instead of re-initialized.
    pub handshake: Option<mcport_client::types::InitializeResult>,
}

/// Seam for producing connections, so tests can swap the real transports
/// for scripted ones.
#[async_trait::async_trait]
pub trait ConnectionSource: Send + Sync {
    async fn connect(
        &self,
        resume_session: Option<(String, Option<String>)>,
    ) -> Result<Connection>;
}

#[async_trait::async_trait]
impl ConnectionSource for ConnectionFactory {
    /// Connect, handshake (or resume `resume_session` by validating it with
    /// a ping), and start background streams.
    async fn connect(
        &self,
        resume_session: Option<(String, Option<String>)>,
    ) -> Result<Connection> {
        match &self.transport {
            TransportConfig::Http {
                url, timeout_ms, ..
            } => {
                let (initial_session_id, prior_version) = match resume_session {
                    Some((sid, version)) => (Some(sid), version),
                    None => (None, None),
                };
                let resuming = initial_session_id.is_some();

                let transport = HttpTransport::new(HttpTransportOptions {
                    url: url.clone(),
                    headers: self.headers.clone(),
                    timeout: Duration::from_millis(*timeout_ms),
                    auth: self.auth.clone(),
                    initial_session_id,
                })?;
                let core = Arc::new(ClientCore::new(
                    Arc::clone(&transport) as Arc<dyn McpTransport>,
                    self.timeout,
                ));
                core.start().await?;

                let handshake = if resuming {
                    if let Some(version) = prior_version {
                        transport.set_protocol_version(&version);
                    }
                    // Validate the resumed session; a 404 surfaces as
                    // SessionExpired and is terminal.
                    core.ping().await?;
                    info!("resumed existing MCP session");
                    None
                } else {
                    Some(core.initialize(CLIENT_NAME).await?)
                };

                transport.start_stream().await?;
                Ok(Connection { core, handshake })
            },
            TransportConfig::Stdio { command, args, env } => {
                let transport = StdioTransport::spawn(command, args, env).await?;
                let core = Arc::new(ClientCore::new(
                    transport as Arc<dyn McpTransport>,
                    self.timeout,
                ));
                core.start().await?;
                let handshake = Some(core.initialize(CLIENT_NAME).await?);
                Ok(Connection { core, handshake })
            },
        }
    }
}

/// Shared bridge state behind the IPC socket and proxy server.
pub struct BridgeService {
    session: String,
    registry: SessionRegistry,
    factory: Box<dyn ConnectionSource>,
    core: RwLock<Arc<ClientCore>>,
    cache: Arc<StdMutex<ListCache>>,
    pub state: StateCell,
    shutdown_tx: watch::Sender<bool>,
    /// IPC requests currently in flight (for draining).
    pub outstanding: AtomicUsize,
}

impl BridgeService {
    /// Build the first connection and assemble the service.
    pub async fn start(
        session: &str,
        registry: SessionRegistry,
        factory: Box<dyn ConnectionSource>,
        cache_ttl: Duration,
        resume_session: Option<(String, Option<String>)>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Result<Arc<Self>> {
        let state = StateCell::new();
        let connection = factory.connect(resume_session).await?;

        let service = Arc::new(Self {
            session: session.to_string(),
            registry,
            factory,
            core: RwLock::new(Arc::clone(&connection.core)),
            cache: Arc::new(StdMutex::new(ListCache::new(cache_ttl))),
            state,
            shutdown_tx,
            outstanding: AtomicUsize::new(0),
        });
        Self::attach(&service, &connection.core);
        service.state.set(BridgeState::Ready);
        Ok(service)
    }

    /// Latest handshake data for registry bookkeeping.
    pub async fn session_identity(&self) -> (Option<String>, Option<String>) {
        let core = self.core.read().await;
        (core.mcp_session_id(), core.protocol_version())
    }

    /// Install the cache-invalidation hook and spawn the event pump for a
    /// (re)built connection.
    fn attach(service: &Arc<Self>, core: &Arc<ClientCore>) {
        let cache = Arc::clone(&service.cache);
        core.set_notification_hook(Box::new(move |notif| {
            let kinds = kinds_for_notification(&notif.method);
            if !kinds.is_empty() {
                let mut cache = cache.lock().expect("poisoned");
                for kind in kinds {
                    cache.invalidate(*kind);
                }
            }
        }));

        let service = Arc::clone(service);
        let core = Arc::clone(core);
        tokio::spawn(async move {
            service.run_events(core).await;
        });
    }

    async fn run_events(self: Arc<Self>, core: Arc<ClientCore>) {
        let Some(mut events) = core.take_events().await else {
            return;
        };
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Notification(notif) => {
                    let kinds = kinds_for_notification(&notif.method);
                    if kinds.is_empty() {
                        debug!(method = %notif.method, "server notification");
                        continue;
                    }
                    // Cache was already invalidated on the dispatch path;
                    // stamp the registry so CLIs can observe the change.
                    let stamp = kinds[0].stamp_key();
                    let at = now_unix();
                    info!(kind = stamp, "list_changed notification");
                    if let Err(e) = self
                        .registry
                        .update(&self.session, move |r| r.notifications.touch(stamp, at))
                        .await
                    {
                        warn!(error = %e, "failed to stamp notification in registry");
                    }
                },
                ClientEvent::TransportDown { code, message } => {
                    if code == 4 {
                        self.mark_expired(&message).await;
                    } else {
                        error!(%message, "transport down, stopping bridge");
                        self.state.set(BridgeState::Stopping);
                    }
                    let _ = self.shutdown_tx.send(true);
                    return;
                },
            }
        }
    }

    /// Record session expiry and begin termination. Never retried.
    async fn mark_expired(&self, message: &str) {
        warn!(%message, "session expired, terminating bridge");
        self.state.set(BridgeState::Expired);
        if let Err(e) = self
            .registry
            .update(&self.session, |r| r.status = SessionStatus::Expired)
            .await
        {
            warn!(error = %e, "failed to mark session expired in registry");
        }
        let _ = self.shutdown_tx.send(true);
    }

    /// Inspect an upstream error for bridge-terminating conditions.
    async fn observe_error(&self, err: &Error) {
        match err {
            Error::SessionExpired(message) => {
                let message = message.clone();
                self.mark_expired(&message).await;
            },
            Error::Auth(_) => {
                // The transport already performed its single refresh+retry;
                // a surfaced auth error means the refresh failed.
                self.state.set(BridgeState::RefreshingAuth);
                self.state.set(BridgeState::Stopping);
                let _ = self.shutdown_tx.send(true);
            },
            _ => {},
        }
    }

    async fn current_core(&self) -> Arc<ClientCore> {
        Arc::clone(&*self.core.read().await)
    }

    /// Cached aggregate list payload for a kind, fetching on miss.
    async fn list_payload(&self, kind: ListKind) -> Result<serde_json::Value> {
        let generation = {
            let mut cache = self.cache.lock().expect("poisoned");
            if let Some(hit) = cache.get(kind) {
                debug!(kind = kind.as_str(), "list served from cache");
                return Ok(hit);
            }
            cache.generation()
        };

        let core = self.current_core().await;
        let payload = match kind {
            ListKind::Tools => serde_json::to_value(core.list_tools_all().await?)?,
            ListKind::Resources => serde_json::to_value(core.list_resources_all().await?)?,
            ListKind::ResourceTemplates => {
                serde_json::to_value(core.list_resource_templates_all().await?)?
            },
            ListKind::Prompts => serde_json::to_value(core.list_prompts_all().await?)?,
        };

        self.cache
            .lock()
            .expect("poisoned")
            .insert_if_current(generation, kind, payload.clone());
        Ok(payload)
    }

    /// Shut the current connection down (graceful DELETE on HTTP).
    pub async fn shutdown_connection(&self) {
        self.current_core().await.shutdown().await;
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Handle one IPC request. Methods mirror the client surface plus
    /// bridge-level control methods.
    pub async fn handle_ipc(
        self: Arc<Self>,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let result = if method == "restart" {
            Arc::clone(&self)
                .restart_attached()
                .await
                .map(|()| serde_json::json!({ "restarted": true }))
        } else {
            self.dispatch_ipc(method, params).await
        };
        if let Err(err) = &result {
            self.observe_error(err).await;
        }
        result
    }

    async fn dispatch_ipc(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let core = self.current_core().await;
        match method {
            // Bridge-local liveness probe; never touches the upstream.
            "ping" => Ok(serde_json::json!({
                "status": "ok",
                "state": self.state.get().to_string(),
            })),
            "shutdown" => {
                info!(session = %self.session, "shutdown requested over IPC");
                self.state.set(BridgeState::Draining);
                let _ = self.shutdown_tx.send(true);
                Ok(serde_json::json!({ "stopping": true }))
            },
            "getServerCapabilities" => Ok(core
                .server_info()
                .map(|s| serde_json::to_value(s.capabilities))
                .transpose()?
                .unwrap_or(serde_json::Value::Null)),
            "getServerVersion" => Ok(core
                .server_info()
                .map(|s| serde_json::to_value(s.server_info))
                .transpose()?
                .unwrap_or(serde_json::Value::Null)),
            "getInstructions" => Ok(core
                .server_info()
                .and_then(|s| s.instructions)
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null)),
            "getProtocolVersion" => Ok(core
                .protocol_version()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null)),
            "pingUpstream" => {
                core.ping().await?;
                Ok(serde_json::json!({ "status": "ok" }))
            },
            "listTools" => self.list_payload(ListKind::Tools).await,
            "listResources" => self.list_payload(ListKind::Resources).await,
            "listResourceTemplates" => self.list_payload(ListKind::ResourceTemplates).await,
            "listPrompts" => self.list_payload(ListKind::Prompts).await,
            "callTool" => {
                let params = params.unwrap_or_default();
                let name = require_str(&params, "name")?;
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(serde_json::json!({}));
                Ok(serde_json::to_value(core.call_tool(&name, arguments).await?)?)
            },
            "readResource" => {
                let params = params.unwrap_or_default();
                let uri = require_str(&params, "uri")?;
                Ok(serde_json::to_value(core.read_resource(&uri).await?)?)
            },
            "subscribeResource" => {
                let params = params.unwrap_or_default();
                let uri = require_str(&params, "uri")?;
                core.subscribe_resource(&uri).await?;
                Ok(serde_json::json!({ "subscribed": true }))
            },
            "unsubscribeResource" => {
                let params = params.unwrap_or_default();
                let uri = require_str(&params, "uri")?;
                core.unsubscribe_resource(&uri).await?;
                Ok(serde_json::json!({ "subscribed": false }))
            },
            "getPrompt" => {
                let params = params.unwrap_or_default();
                let name = require_str(&params, "name")?;
                let arguments = params.get("arguments").cloned();
                Ok(serde_json::to_value(core.get_prompt(&name, arguments).await?)?)
            },
            "setLoggingLevel" => {
                let params = params.unwrap_or_default();
                let level = require_str(&params, "level")?;
                core.set_logging_level(&level).await?;
                Ok(serde_json::json!({ "level": level }))
            },
            other => Err(Error::client(format!("unknown bridge method: {other}"))),
        }
    }

    /// Tear down the current connection and build a fresh one (fresh
    /// `MCP-Session-Id` on HTTP, fresh child on stdio), re-attaching the
    /// cache hook and event pump.
    pub async fn restart_attached(self: Arc<Self>) -> Result<()> {
        info!(session = %self.session, "restarting MCP connection");
        self.state.set(BridgeState::Initializing);

        let old = self.current_core().await;
        old.shutdown().await;

        let connection = self.factory.connect(None).await?;
        Self::attach(&self, &connection.core);
        *self.core.write().await = Arc::clone(&connection.core);
        self.cache.lock().expect("poisoned").invalidate_all();

        let (session_id, protocol_version) = (
            connection.core.mcp_session_id(),
            connection.core.protocol_version(),
        );
        self.registry
            .update(&self.session, move |r| {
                r.mcp_session_id = session_id;
                r.protocol_version = protocol_version;
                r.status = SessionStatus::Live;
            })
            .await?;

        self.state.set(BridgeState::Ready);
        Ok(())
    }

    /// Handle one MCP-wire request from the proxy server. Forwards the
    /// tool/resource/prompt surface; `initialize` is answered locally so
    /// proxy clients can complete their own handshake.
    pub async fn handle_mcp(
        self: Arc<Self>,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let result = self.dispatch_mcp(method, params).await;
        if let Err(err) = &result {
            self.observe_error(err).await;
        }
        result
    }

    async fn dispatch_mcp(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        match method {
            "initialize" => {
                let core = self.current_core().await;
                let (capabilities, version) = match core.server_info() {
                    Some(info) => (
                        serde_json::to_value(info.capabilities)?,
                        info.protocol_version,
                    ),
                    None => (
                        serde_json::json!({}),
                        core.protocol_version()
                            .unwrap_or_else(|| mcport_client::LATEST_PROTOCOL_VERSION.into()),
                    ),
                };
                Ok(serde_json::json!({
                    "protocolVersion": version,
                    "capabilities": capabilities,
                    "serverInfo": {
                        "name": "mcport-proxy",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }))
            },
            "ping" => self.dispatch_ipc("pingUpstream", None).await,
            "tools/list" => self.list_payload(ListKind::Tools).await,
            "tools/call" => self.dispatch_ipc("callTool", params).await,
            "resources/list" => self.list_payload(ListKind::Resources).await,
            "resources/templates/list" => self.list_payload(ListKind::ResourceTemplates).await,
            "resources/read" => self.dispatch_ipc("readResource", params).await,
            "resources/subscribe" => self.dispatch_ipc("subscribeResource", params).await,
            "resources/unsubscribe" => self.dispatch_ipc("unsubscribeResource", params).await,
            "prompts/list" => self.list_payload(ListKind::Prompts).await,
            "prompts/get" => self.dispatch_ipc("getPrompt", params).await,
            "logging/setLevel" => self.dispatch_ipc("setLoggingLevel", params).await,
            other => Err(Error::mcp(-32601, format!("method not found: {other}"))),
        }
    }
}

fn require_str(params: &serde_json::Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::client(format!("missing required parameter '{key}'")))
}
