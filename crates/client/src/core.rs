//! The client core: monotonic id allocation, request/response correlation,
//! the initialize handshake, and the typed MCP operation surface.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use {
    tokio::sync::{Mutex, mpsc, oneshot},
    tracing::{debug, info, warn},
};

use mcport_common::{Error, Result};

use crate::{
    transport::{InboundFrame, McpTransport},
    types::{
        CallToolParams, CallToolResult, ClientCapabilities, ClientInfo, GetPromptResult,
        InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcResponse,
        LATEST_PROTOCOL_VERSION, PromptsListResult, ReadResourceResult,
        ResourceTemplatesListResult, ResourcesListResult, ToolsListResult,
    },
};

/// Events the core surfaces to its owner (the bridge).
#[derive(Debug)]
pub enum ClientEvent {
    /// A server-sent notification, in arrival order.
    Notification(JsonRpcNotification),
    /// The transport died; every pending call has already been failed.
    TransportDown { code: i64, message: String },
}

type PendingMap = Arc<StdMutex<HashMap<i64, oneshot::Sender<Result<JsonRpcResponse>>>>>;

/// Synchronous hook run on the dispatch task for every notification, before
/// any later response frame can resolve. The bridge uses this to invalidate
/// its cache ahead of the response that triggered the change.
pub type NotificationHook = Box<dyn Fn(&JsonRpcNotification) + Send + Sync>;

/// One MCP connection: owns the transport handle and correlates frames.
pub struct ClientCore {
    transport: Arc<dyn McpTransport>,
    pending: PendingMap,
    next_id: AtomicI64,
    timeout: Duration,
    server: StdMutex<Option<InitializeResult>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    dispatch_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    notification_hook: Arc<StdMutex<Option<NotificationHook>>>,
}

impl ClientCore {
    #[must_use]
    pub fn new(transport: Arc<dyn McpTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            pending: Arc::new(StdMutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            timeout,
            server: StdMutex::new(None),
            events_rx: Mutex::new(None),
            dispatch_handle: Mutex::new(None),
            notification_hook: Arc::new(StdMutex::new(None)),
        }
    }

    /// Install the synchronous notification hook. May be set before or
    /// after `start`.
    pub fn set_notification_hook(&self, hook: NotificationHook) {
        *self.notification_hook.lock().expect("poisoned") = Some(hook);
    }

    /// Start the transport and the frame dispatcher. Must run before any
    /// request.
    pub async fn start(&self) -> Result<()> {
        self.transport.start().await?;
        let mut frames = self
            .transport
            .take_frames()
            .await
            .ok_or_else(|| Error::client("transport frames already consumed"))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        *self.events_rx.lock().await = Some(events_rx);

        let pending = Arc::clone(&self.pending);
        let hook = Arc::clone(&self.notification_hook);
        let handle = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match frame {
                    InboundFrame::Response(resp) => match resp.id_as_i64() {
                        Some(id) => {
                            let sender = pending.lock().expect("poisoned").remove(&id);
                            match sender {
                                Some(tx) => {
                                    let _ = tx.send(Ok(resp));
                                },
                                None => {
                                    warn!(id, "response for unknown request id");
                                },
                            }
                        },
                        None => warn!("response frame without a numeric id"),
                    },
                    InboundFrame::Notification(notif) => {
                        if let Some(hook) = hook.lock().expect("poisoned").as_ref() {
                            hook(&notif);
                        }
                        let _ = events_tx.send(ClientEvent::Notification(notif));
                    },
                    InboundFrame::Fatal { code, message } => {
                        fail_all_pending(&pending, code, &message);
                        let _ = events_tx.send(ClientEvent::TransportDown { code, message });
                        return;
                    },
                }
            }
            // Frame channel closed without a fatal marker.
            fail_all_pending(&pending, 3, "transport closed");
            let _ = events_tx.send(ClientEvent::TransportDown {
                code: 3,
                message: "transport closed".into(),
            });
        });
        *self.dispatch_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Take the event receiver (one consumer: the bridge).
    pub async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Send a request and await its response within the per-call deadline.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("poisoned").insert(id, tx);

        let mut envelope = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            envelope["params"] = params;
        }

        debug!(method = %method, id, "sending MCP request");
        if let Err(e) = self.transport.send(envelope).await {
            self.pending.lock().expect("poisoned").remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => {
                self.pending.lock().expect("poisoned").remove(&id);
                Err(Error::network(format!(
                    "MCP request '{method}' timed out after {}ms",
                    self.timeout.as_millis()
                )))
            },
            Ok(Err(_)) => Err(Error::network(format!(
                "client core shut down while waiting for '{method}'"
            ))),
            Ok(Ok(result)) => {
                let resp = result?;
                if let Some(err) = resp.error {
                    return Err(Error::mcp(err.code, err.message));
                }
                Ok(resp.result.unwrap_or(serde_json::Value::Null))
            },
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let mut envelope = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            envelope["params"] = params;
        }
        self.transport.send(envelope).await
    }

    /// Run the MCP initialize handshake and send the `initialized`
    /// notification. The server's protocol version becomes the negotiated
    /// value on subsequent HTTP requests.
    pub async fn initialize(&self, client_name: &str) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: client_name.into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let result = self
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(result)?;

        info!(
            protocol = %result.protocol_version,
            server = %result.server_info.name,
            "MCP server initialized"
        );

        self.transport.set_protocol_version(&result.protocol_version);
        *self.server.lock().expect("poisoned") = Some(result.clone());

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    // ── Typed operations ────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<()> {
        self.request("ping", None).await.map(|_| ())
    }

    pub async fn list_tools(&self, cursor: Option<&str>) -> Result<ToolsListResult> {
        let result = self.request("tools/list", cursor_params(cursor)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<ResourcesListResult> {
        let result = self.request("resources/list", cursor_params(cursor)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<ResourceTemplatesListResult> {
        let result = self
            .request("resources/templates/list", cursor_params(cursor))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_prompts(&self, cursor: Option<&str>) -> Result<PromptsListResult> {
        let result = self.request("prompts/list", cursor_params(cursor)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Paginate `tools/list` to exhaustion and return the aggregate.
    pub async fn list_tools_all(&self) -> Result<ToolsListResult> {
        let mut page = self.list_tools(None).await?;
        let mut tools = std::mem::take(&mut page.tools);
        let mut cursor = page.next_cursor;
        while let Some(c) = cursor {
            let mut next = self.list_tools(Some(&c)).await?;
            tools.append(&mut next.tools);
            cursor = next.next_cursor;
        }
        Ok(ToolsListResult {
            tools,
            next_cursor: None,
        })
    }

    /// Paginate `resources/list` to exhaustion.
    pub async fn list_resources_all(&self) -> Result<ResourcesListResult> {
        let mut page = self.list_resources(None).await?;
        let mut resources = std::mem::take(&mut page.resources);
        let mut cursor = page.next_cursor;
        while let Some(c) = cursor {
            let mut next = self.list_resources(Some(&c)).await?;
            resources.append(&mut next.resources);
            cursor = next.next_cursor;
        }
        Ok(ResourcesListResult {
            resources,
            next_cursor: None,
        })
    }

    /// Paginate `resources/templates/list` to exhaustion.
    pub async fn list_resource_templates_all(&self) -> Result<ResourceTemplatesListResult> {
        let mut page = self.list_resource_templates(None).await?;
        let mut templates = std::mem::take(&mut page.resource_templates);
        let mut cursor = page.next_cursor;
        while let Some(c) = cursor {
            let mut next = self.list_resource_templates(Some(&c)).await?;
            templates.append(&mut next.resource_templates);
            cursor = next.next_cursor;
        }
        Ok(ResourceTemplatesListResult {
            resource_templates: templates,
            next_cursor: None,
        })
    }

    /// Paginate `prompts/list` to exhaustion.
    pub async fn list_prompts_all(&self) -> Result<PromptsListResult> {
        let mut page = self.list_prompts(None).await?;
        let mut prompts = std::mem::take(&mut page.prompts);
        let mut cursor = page.next_cursor;
        while let Some(c) = cursor {
            let mut next = self.list_prompts(Some(&c)).await?;
            prompts.append(&mut next.prompts);
            cursor = next.next_cursor;
        }
        Ok(PromptsListResult {
            prompts,
            next_cursor: None,
        })
    }

    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.into(),
            arguments,
        };
        let result = self
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let result = self
            .request("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn subscribe_resource(&self, uri: &str) -> Result<()> {
        self.request("resources/subscribe", Some(serde_json::json!({ "uri": uri })))
            .await
            .map(|_| ())
    }

    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<()> {
        self.request(
            "resources/unsubscribe",
            Some(serde_json::json!({ "uri": uri })),
        )
        .await
        .map(|_| ())
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<GetPromptResult> {
        let mut params = serde_json::json!({ "name": name });
        if let Some(args) = arguments {
            params["arguments"] = args;
        }
        let result = self.request("prompts/get", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn set_logging_level(&self, level: &str) -> Result<()> {
        self.request("logging/setLevel", Some(serde_json::json!({ "level": level })))
            .await
            .map(|_| ())
    }

    // ── Negotiated server state ─────────────────────────────────────────

    #[must_use]
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server.lock().expect("poisoned").clone()
    }

    #[must_use]
    pub fn protocol_version(&self) -> Option<String> {
        self.server
            .lock()
            .expect("poisoned")
            .as_ref()
            .map(|s| s.protocol_version.clone())
    }

    #[must_use]
    pub fn mcp_session_id(&self) -> Option<String> {
        self.transport.mcp_session_id()
    }

    /// Stop the dispatcher and tear down the transport.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.dispatch_handle.lock().await.take() {
            handle.abort();
        }
        fail_all_pending(&self.pending, 3, "client shutting down");
        self.transport.stop().await;
    }
}

fn cursor_params(cursor: Option<&str>) -> Option<serde_json::Value> {
    cursor.map(|c| serde_json::json!({ "cursor": c }))
}

fn fail_all_pending(pending: &PendingMap, code: i64, message: &str) {
    let drained: Vec<_> = {
        let mut map = pending.lock().expect("poisoned");
        map.drain().collect()
    };
    for (_, tx) in drained {
        let _ = tx.send(Err(Error::from_ipc(code, message.to_string())));
    }
}
