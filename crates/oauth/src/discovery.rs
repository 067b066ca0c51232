//! Authorization-server metadata discovery (RFC 8414 / OpenID Connect).
//!
//! Finds the token endpoint for an MCP server by probing the well-known
//! locations, path-aware first, then at the origin root.

use {
    reqwest::Client,
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
    url::Url,
};

use mcport_common::{Error, Result};

/// The subset of authorization-server metadata the token manager needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    /// URL of the token endpoint.
    pub token_endpoint: String,
    /// The AS issuer identifier, when advertised.
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Well-known suffixes probed in order.
const WELL_KNOWN_SUFFIXES: &[&str] = &["oauth-authorization-server", "openid-configuration"];

/// Discover authorization-server metadata for an MCP server URL.
///
/// Probes `<serverUrl>/.well-known/oauth-authorization-server` and
/// `<serverUrl>/.well-known/openid-configuration`; when the server URL has
/// a non-trivial path, the same suffixes are retried at the origin. The
/// first response with a `token_endpoint` wins.
pub async fn discover(client: &Client, server_url: &str) -> Result<AuthServerMetadata> {
    let server_url = Url::parse(server_url)
        .map_err(|e| Error::client(format!("invalid server URL '{server_url}': {e}")))?;
    let origin = origin_url(&server_url);
    let has_path = server_url.path() != "/" && !server_url.path().is_empty();

    let mut bases = vec![server_url.clone()];
    if has_path {
        bases.push(origin);
    }

    let mut last_error = None;
    for base in &bases {
        for suffix in WELL_KNOWN_SUFFIXES.iter().copied() {
            let url = build_well_known_url(base, suffix)?;
            match fetch_metadata(client, &url).await {
                Ok(meta) => {
                    info!(
                        token_endpoint = %meta.token_endpoint,
                        via = %url,
                        "discovered authorization server metadata"
                    );
                    return Ok(meta);
                },
                Err(e) => {
                    debug!(url = %url, error = %e, "metadata probe failed");
                    last_error = Some(e);
                },
            }
        }
    }

    Err(Error::auth(format!(
        "could not discover authorization server metadata for {server_url}{}",
        last_error
            .map(|e| format!(" (last error: {e})"))
            .unwrap_or_default()
    )))
}

async fn fetch_metadata(client: &Client, url: &Url) -> Result<AuthServerMetadata> {
    let resp = client
        .get(url.as_str())
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| Error::network(format!("failed to fetch {url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(Error::network(format!(
            "metadata endpoint {url} returned HTTP {}",
            resp.status()
        )));
    }

    resp.json::<AuthServerMetadata>()
        .await
        .map_err(|e| Error::network(format!("failed to parse metadata from {url}: {e}")))
}

/// Build a `/.well-known/<suffix>` URL following RFC 8615 path conventions.
fn build_well_known_url(base: &Url, suffix: &str) -> Result<Url> {
    let mut url = base.clone();
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url.join(&format!(".well-known/{suffix}"))
        .map_err(|e| Error::client(format!("failed to build .well-known/{suffix} URL: {e}")))
}

/// Origin (scheme + host + port) of a URL, path and query stripped.
fn origin_url(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}
