//! Shared error taxonomy, tunables, and filesystem paths for mcport crates.

pub mod error;
pub mod paths;

pub use error::{Annotate, Error, Reason, Result};

/// Cache TTL for list results (`ttlMs`).
pub const DEFAULT_TTL_MS: u64 = 300_000;
/// Per-call deadline for MCP requests (`timeoutMs`).
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Preemptive token refresh window (`refreshBufferSec`).
pub const DEFAULT_REFRESH_BUFFER_SEC: u64 = 60;
/// Registry lock retry budget (`lockTimeoutMs`).
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
/// One-shot IPC request timeout.
pub const DEFAULT_IPC_TIMEOUT_MS: u64 = 30_000;
