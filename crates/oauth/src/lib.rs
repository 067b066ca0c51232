//! OAuth token lifecycle for mcport bridges: authorization-server discovery,
//! refresh-grant flow, and preemptive refresh with keychain persistence.

pub mod discovery;
pub mod manager;

pub use {
    discovery::{AuthServerMetadata, discover},
    manager::{PersistMetadata, RefreshedMetadata, TokenManager},
};
