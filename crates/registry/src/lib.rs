//! Persistent session registry and auth-profile metadata for mcport.
//!
//! `sessions.json` is the single source of truth for session state, shared
//! between bridges and CLI invocations under an advisory file lock. Writes
//! are atomic (tempfile + rename) and owner-only.

mod file_io;
pub mod profiles;
pub mod store;
pub mod types;

pub use {
    profiles::ProfileStore,
    store::{ConsolidateReport, SessionRegistry, pid_alive},
    types::{
        AuthProfile, AuthType, ListStamp, NotificationStamps, ProfilesFile, ProxyConfig,
        REDACTED, RegistryFile, SessionOptions, SessionRecord, SessionStatus, TransportConfig,
        validate_session_name,
    },
};
