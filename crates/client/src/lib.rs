//! MCP client plumbing for mcport bridges.
//!
//! This crate provides:
//! - JSON-RPC envelopes and MCP payload types (`types`)
//! - the transport capability set with an inbound frame channel (`transport`)
//! - the Streamable HTTP transport with SSE resumption (`http_transport`)
//! - the child-process stdio transport (`stdio_transport`)
//! - the request/response correlator and typed surface (`core`)
//! - the TTL list cache (`cache`)

pub mod cache;
pub mod core;
pub mod http_transport;
pub mod stdio_transport;
pub mod transport;
pub mod types;

pub use {
    cache::{ListCache, ListKind, kinds_for_notification},
    core::{ClientCore, ClientEvent, NotificationHook},
    http_transport::{HttpTransport, HttpTransportOptions},
    stdio_transport::StdioTransport,
    transport::{InboundFrame, McpTransport},
    types::LATEST_PROTOCOL_VERSION,
};
