//! Proxy server tests: health is open, everything else honours the bearer,
//! and MCP envelopes are forwarded to the upstream.

mod support;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use secrecy::Secret;

use mcport_bridge::proxy::build_router;

use support::{Responder, harness};

fn responder(fetches: Arc<AtomicUsize>) -> Responder {
    Arc::new(move |msg: &serde_json::Value| {
        let id = msg["id"].as_i64().unwrap_or_default();
        match msg["method"].as_str() {
            Some("tools/list") => {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(vec![serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"tools": [
                        {"name": "echo", "inputSchema": {"type": "object"}},
                        {"name": "add", "inputSchema": {"type": "object"}},
                    ]},
                })])
            },
            _ => Ok(vec![serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {},
            })]),
        }
    })
}

/// Serve the proxy router on an ephemeral port, returning its base URL.
async fn serve_proxy(h: &support::Harness, bearer: Option<&str>) -> String {
    let app = build_router(
        Arc::clone(&h.service),
        bearer.map(|b| Secret::new(b.to_string())),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn envelope(method: &str) -> serde_json::Value {
    serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": method})
}

#[tokio::test]
async fn health_needs_no_auth() {
    let h = harness("p-health", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, Some("T")).await;

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_bearer_is_401() {
    let h = harness("p-missing", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, Some("T")).await;

    let resp = reqwest::Client::new()
        .post(&base)
        .json(&envelope("tools/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn wrong_bearer_is_403() {
    let h = harness("p-wrong", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, Some("T")).await;

    let resp = reqwest::Client::new()
        .post(&base)
        .header("Authorization", "Bearer wrong")
        .json(&envelope("tools/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn correct_bearer_forwards_tools_list() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let h = harness("p-ok", responder(Arc::clone(&fetches))).await;
    let base = serve_proxy(&h, Some("T")).await;

    let resp = reqwest::Client::new()
        .post(&base)
        .header("Authorization", "Bearer T")
        .json(&envelope("tools/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 2);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_bearer_configured_means_open_endpoint() {
    let h = harness("p-open", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, None).await;

    let resp = reqwest::Client::new()
        .post(&base)
        .json(&envelope("tools/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn initialize_is_answered_locally() {
    let h = harness("p-init", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, None).await;

    let resp = reqwest::Client::new()
        .post(&base)
        .json(&envelope("initialize"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["serverInfo"]["name"], "mcport-proxy");
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
}

#[tokio::test]
async fn notifications_are_accepted_with_202() {
    let h = harness("p-notif", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, None).await;

    let resp = reqwest::Client::new()
        .post(&base)
        .json(&serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
}

#[tokio::test]
async fn get_root_is_405_after_auth() {
    let h = harness("p-get", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, Some("T")).await;

    let client = reqwest::Client::new();
    let unauth = client.get(&base).send().await.unwrap();
    assert_eq!(unauth.status(), 401);

    let authed = client
        .get(&base)
        .header("Authorization", "Bearer T")
        .send()
        .await
        .unwrap();
    assert_eq!(authed.status(), 405);
}

#[tokio::test]
async fn delete_is_a_no_op_200() {
    let h = harness("p-delete", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, Some("T")).await;

    let resp = reqwest::Client::new()
        .delete(&base)
        .header("Authorization", "Bearer T")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "session terminated");
}

#[tokio::test]
async fn unknown_mcp_method_maps_to_method_not_found() {
    let h = harness("p-unknown", responder(Arc::new(AtomicUsize::new(0)))).await;
    let base = serve_proxy(&h, None).await;

    let resp = reqwest::Client::new()
        .post(&base)
        .json(&envelope("sampling/createMessage"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32601);
}
