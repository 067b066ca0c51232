//! Optional proxy server: re-exposes the bridge's upstream as a local MCP
//! HTTP endpoint for sandboxed clients, without ever leaking upstream
//! credentials.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    },
    secrecy::{ExposeSecret, Secret},
    tower_http::trace::TraceLayer,
    tracing::{debug, info},
};

use mcport_common::{Error, Result};
use mcport_registry::ProxyConfig;

use crate::service::BridgeService;

#[derive(Clone)]
pub struct ProxyState {
    service: Arc<BridgeService>,
    bearer: Option<Secret<String>>,
}

/// Build the proxy router. Health is unauthenticated; everything else
/// requires the bearer when one is configured.
pub fn build_router(service: Arc<BridgeService>, bearer: Option<Secret<String>>) -> Router {
    let state = ProxyState { service, bearer };
    Router::new()
        .route("/health", get(health))
        .route(
            "/",
            get(method_not_allowed)
                .post(mcp_post)
                .delete(mcp_delete),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve the proxy until the bridge exits.
pub async fn serve(
    config: ProxyConfig,
    bearer: Option<Secret<String>>,
    service: Arc<BridgeService>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::client(format!("proxy failed to bind {addr}: {e}")))?;
    info!(%addr, "proxy server listening");

    let app = build_router(service, bearer);
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::network(format!("proxy server failed: {e}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Bearer gate: 401 when the header is missing or malformed, 403 when the
/// token does not match.
fn check_bearer(state: &ProxyState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(expected) = &state.bearer else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "missing bearer token" })),
        )
            .into_response()),
        Some(token) if token == expected.expose_secret() => Ok(()),
        Some(_) => Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "invalid bearer token" })),
        )
            .into_response()),
    }
}

async fn mcp_post(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if let Err(response) = check_bearer(&state, &headers) {
        return response;
    }

    let method = body.get("method").and_then(|m| m.as_str());
    let id = body.get("id").cloned();

    match (method, id) {
        (Some(method), Some(id)) => {
            debug!(method, "proxy request");
            let params = body.get("params").cloned();
            match state.service.handle_mcp(method, params).await {
                Ok(result) => Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": result,
                }))
                .into_response(),
                Err(e) => Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": jsonrpc_code(&e), "message": e.to_string() },
                }))
                .into_response(),
            }
        },
        (Some(method), None) => {
            // Notifications are accepted and dropped.
            debug!(method, "proxy notification");
            StatusCode::ACCEPTED.into_response()
        },
        _ => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "expected a JSON-RPC envelope" })),
        )
            .into_response(),
    }
}

async fn method_not_allowed(
    State(state): State<ProxyState>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_bearer(&state, &headers) {
        return response;
    }
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

/// DELETE is a no-op: the proxy has no sessions of its own to terminate.
async fn mcp_delete(State(state): State<ProxyState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_bearer(&state, &headers) {
        return response;
    }
    (StatusCode::OK, "session terminated").into_response()
}

/// JSON-RPC error code for an error crossing the proxy boundary: MCP errors
/// keep their code, everything else maps to a generic server error.
fn jsonrpc_code(err: &Error) -> i64 {
    match err {
        Error::Mcp { code, .. } => *code,
        _ => -32000,
    }
}
