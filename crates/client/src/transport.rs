//! Transport abstraction: both MCP transports push decoded frames up an
//! inbound channel and never call back into the client core.

use {async_trait::async_trait, tokio::sync::mpsc};

use mcport_common::{Error, Result};

use crate::types::{JsonRpcNotification, JsonRpcResponse};

/// A decoded frame arriving from the server.
#[derive(Debug)]
pub enum InboundFrame {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    /// The transport is permanently down. Carries the error in IPC form so
    /// the core can fail every pending call with its own copy.
    Fatal { code: i64, message: String },
}

impl InboundFrame {
    #[must_use]
    pub fn fatal(err: &Error) -> Self {
        Self::Fatal {
            code: err.ipc_code(),
            message: err.to_string(),
        }
    }
}

/// Capability set shared by the HTTP and stdio transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Start background work (SSE stream, reader tasks). Idempotent.
    async fn start(&self) -> Result<()>;

    /// Send one JSON-RPC envelope (request or notification).
    async fn send(&self, message: serde_json::Value) -> Result<()>;

    /// Take the inbound frame receiver. Yields `None` after the first call.
    async fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<InboundFrame>>;

    /// Tear down the connection (graceful DELETE / child kill).
    async fn stop(&self);

    /// Server-issued `MCP-Session-Id`, once known (HTTP only).
    fn mcp_session_id(&self) -> Option<String> {
        None
    }

    /// Record the negotiated protocol version for subsequent requests
    /// (HTTP only).
    fn set_protocol_version(&self, _version: &str) {}
}
