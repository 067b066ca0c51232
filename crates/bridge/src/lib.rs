//! The per-session bridge: daemon, IPC channel, lifecycle manager, and
//! optional proxy server.
//!
//! The bridge owns one MCP connection (client core + transport + cache) and
//! serves short-lived CLI invocations over a Unix-domain socket. The CLI
//! side lives here too: the [`manager::BridgeManager`] spawns and stops
//! daemons, and the [`ipc_client::IpcClient`] issues one request per
//! invocation.

pub mod daemon;
pub mod ipc;
pub mod ipc_client;
pub mod manager;
pub mod proxy;
pub mod service;
pub mod state;

pub use {
    ipc::{IpcError, IpcRequest, IpcResponse},
    ipc_client::IpcClient,
    manager::BridgeManager,
    service::{BridgeService, Connection, ConnectionFactory, ConnectionSource},
    state::{BridgeState, StateCell},
};
