//! Keychain-backed secret storage for mcport.
//!
//! OAuth credentials, session headers, and proxy bearer tokens live here and
//! nowhere else on disk.

pub mod store;
pub mod types;

pub use {
    store::{
        KeychainSecretStore, MemorySecretStore, SecretStore, SecretStoreExt, headers_key,
        oauth_key, proxy_bearer_key,
    },
    types::{OAuthCredentials, serialize_option_secret, serialize_secret},
};
