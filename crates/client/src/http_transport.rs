//! Streamable HTTP transport: JSON-RPC over POST with dual
//! `application/json` / `text/event-stream` responses, plus a background GET
//! stream for server-initiated frames with `Last-Event-ID` resumption.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures_util::StreamExt,
    reqwest::StatusCode,
    secrecy::ExposeSecret,
    tokio::sync::{Mutex, mpsc},
    tracing::{debug, info, warn},
};

use {mcport_common::{Error, Result}, mcport_oauth::TokenManager};

use crate::{
    transport::{InboundFrame, McpTransport},
    types::JsonRpcMessage,
};

const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Construction options for [`HttpTransport`].
pub struct HttpTransportOptions {
    pub url: String,
    /// Extra request headers (resolved from the secret store, never logged).
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Token source for `Authorization: Bearer`; absent for unauthenticated
    /// or static-header sessions.
    pub auth: Option<Arc<TokenManager>>,
    /// Seed `Mcp-Session-Id` when resuming a server session that an earlier
    /// bridge established.
    pub initial_session_id: Option<String>,
}

/// HTTP transport for a remote MCP server.
pub struct HttpTransport {
    http: reqwest::Client,
    /// Client without a total-request timeout, for long-lived SSE GETs.
    stream_http: reqwest::Client,
    url: String,
    headers: BTreeMap<String, String>,
    auth: Option<Arc<TokenManager>>,
    session_id: Arc<StdMutex<Option<String>>>,
    protocol_version: Arc<StdMutex<Option<String>>>,
    last_event_id: Arc<StdMutex<Option<String>>>,
    frames_tx: mpsc::UnboundedSender<InboundFrame>,
    frames_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
    sse_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
}

impl HttpTransport {
    pub fn new(opts: HttpTransportOptions) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(opts.timeout)
            .build()
            .map_err(|e| Error::network(format!("failed to build HTTP client: {e}")))?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::network(format!("failed to build HTTP stream client: {e}")))?;

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            http,
            stream_http,
            url: opts.url,
            headers: opts.headers,
            auth: opts.auth,
            session_id: Arc::new(StdMutex::new(opts.initial_session_id)),
            protocol_version: Arc::new(StdMutex::new(None)),
            last_event_id: Arc::new(StdMutex::new(None)),
            frames_tx,
            frames_rx: Mutex::new(Some(frames_rx)),
            sse_handle: Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Spawn the background GET stream for server-initiated frames.
    pub async fn start_stream(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.sse_handle.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let transport = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            transport.run_event_stream().await;
        }));
        Ok(())
    }

    fn forward_value(&self, value: serde_json::Value) {
        match JsonRpcMessage::parse(value) {
            Ok(JsonRpcMessage::Response(resp)) => {
                let _ = self.frames_tx.send(InboundFrame::Response(resp));
            },
            Ok(JsonRpcMessage::Notification(notif)) => {
                let _ = self.frames_tx.send(InboundFrame::Notification(notif));
            },
            Ok(JsonRpcMessage::ServerRequest(req)) => {
                debug!(method = ?req.get("method"), "ignoring server-initiated request");
            },
            Err(e) => {
                debug!(error = %e, "dropping undecodable frame");
            },
        }
    }

    fn capture_session_id(&self, resp: &reqwest::Response) {
        if let Some(sid) = resp
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.lock().expect("poisoned");
            if slot.as_deref() != Some(sid) {
                info!("server issued MCP session id");
                *slot = Some(sid.to_string());
            }
        }
    }

    async fn bearer(&self, force_refresh: bool) -> Result<Option<String>> {
        match &self.auth {
            None => Ok(None),
            Some(mgr) => {
                let token = if force_refresh {
                    mgr.refresh_now().await?
                } else {
                    mgr.valid_token().await?
                };
                Ok(Some(format!("Bearer {}", token.expose_secret())))
            },
        }
    }

    fn apply_common_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(sid) = self.session_id.lock().expect("poisoned").clone() {
            req = req.header(SESSION_ID_HEADER, sid);
        }
        if let Some(version) = self.protocol_version.lock().expect("poisoned").clone() {
            req = req.header(PROTOCOL_VERSION_HEADER, version);
        }
        req
    }

    /// Consume an SSE response body, forwarding each decoded frame.
    /// `record_ids` is set for the GET stream so reconnects can resume.
    async fn pump_sse_body(&self, resp: reqwest::Response, record_ids: bool) -> Result<()> {
        let mut stream = resp.bytes_stream();
        let mut parser = SseParser::default();
        let mut buf = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::network(format!("SSE stream read failed: {e}")))?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buf.find('\n') {
                let line: String = buf.drain(..=pos).collect();
                if let Some(event) = parser.feed_line(line.trim_end_matches('\n')) {
                    if record_ids {
                        if let Some(id) = &event.id {
                            *self.last_event_id.lock().expect("poisoned") = Some(id.clone());
                        }
                    }
                    match serde_json::from_str(&event.data) {
                        Ok(value) => self.forward_value(value),
                        Err(e) => debug!(error = %e, "SSE event was not JSON"),
                    }
                }
            }
        }
        Ok(())
    }

    /// The background GET loop. Reconnects with exponential backoff and
    /// `Last-Event-ID`; transient disconnects never surface to callers.
    async fn run_event_stream(self: Arc<Self>) {
        let mut backoff = Duration::from_millis(500);

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }

            let bearer = match self.bearer(false).await {
                Ok(b) => b,
                Err(e) => {
                    debug!(error = %e, "event stream could not obtain a token, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                    continue;
                },
            };

            let mut req = self
                .stream_http
                .get(&self.url)
                .header("Accept", "text/event-stream");
            req = self.apply_common_headers(req);
            if let Some(bearer) = &bearer {
                req = req.header("Authorization", bearer);
            }
            if let Some(last) = self.last_event_id.lock().expect("poisoned").clone() {
                req = req.header(LAST_EVENT_ID_HEADER, last);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    self.capture_session_id(&resp);

                    if status == StatusCode::NOT_FOUND {
                        let body = resp.text().await.unwrap_or_default();
                        if is_session_expired_message(&body) {
                            warn!("event stream rejected: session expired");
                            let err = Error::session_expired(format!(
                                "server no longer recognises this session: {}",
                                body.trim()
                            ));
                            let _ = self.frames_tx.send(InboundFrame::fatal(&err));
                            return;
                        }
                        debug!("event stream returned 404, retrying");
                    } else if status == StatusCode::METHOD_NOT_ALLOWED {
                        debug!("server does not offer a server-initiated event stream");
                        return;
                    } else if status.is_success() {
                        debug!("server event stream connected");
                        backoff = Duration::from_millis(500);
                        if let Err(e) = self.pump_sse_body(resp, true).await {
                            debug!(error = %e, "event stream dropped, reconnecting");
                        } else {
                            debug!("event stream ended, reconnecting");
                        }
                    } else {
                        debug!(%status, "event stream connect failed, retrying");
                    }
                },
                Err(e) => {
                    debug!(error = %e, "event stream connect error, retrying");
                },
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn start(&self) -> Result<()> {
        // The GET stream is started by `start_stream` (needs the Arc); POSTs
        // need no setup.
        Ok(())
    }

    async fn send(&self, message: serde_json::Value) -> Result<()> {
        let method = message
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("?")
            .to_string();
        let mut refreshed = false;

        loop {
            let bearer = self.bearer(refreshed).await?;

            let mut req = self
                .http
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("Accept", "application/json, text/event-stream");
            req = self.apply_common_headers(req);
            if let Some(bearer) = &bearer {
                req = req.header("Authorization", bearer);
            }

            debug!(method = %method, "POST JSON-RPC");
            let resp = req.json(&message).send().await.map_err(|e| {
                Error::network(format!("POST to '{}' for '{method}' failed: {e}", self.url))
            })?;

            let status = resp.status();
            self.capture_session_id(&resp);

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                if self.auth.is_some() && !refreshed {
                    debug!(%status, "auth rejected, refreshing token and retrying once");
                    refreshed = true;
                    continue;
                }
                return Err(Error::auth(format!(
                    "server rejected credentials for '{method}' (HTTP {status})"
                )));
            }

            if status == StatusCode::NOT_FOUND {
                let body = resp.text().await.unwrap_or_default();
                if is_session_expired_message(&body) {
                    return Err(Error::session_expired(format!(
                        "server no longer recognises this session (HTTP 404): {}",
                        body.trim()
                    )));
                }
                return Err(Error::network(format!("HTTP 404 for '{method}': {body}")));
            }

            if status == StatusCode::ACCEPTED {
                // Notification accepted, nothing to read.
                return Ok(());
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::network(format!(
                    "HTTP {status} for '{method}': {body}"
                )));
            }

            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            if content_type.starts_with("text/event-stream") {
                self.pump_sse_body(resp, false).await?;
            } else {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| Error::network(format!("failed to read response body: {e}")))?;
                if !bytes.is_empty() {
                    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
                    self.forward_value(value);
                }
            }
            return Ok(());
        }
    }

    async fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<InboundFrame>> {
        self.frames_rx.lock().await.take()
    }

    async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sse_handle.lock().await.take() {
            handle.abort();
        }

        // Graceful release of the server-side session.
        let sid = self.session_id.lock().expect("poisoned").clone();
        if let Some(sid) = sid {
            let mut req = self.http.delete(&self.url).header(SESSION_ID_HEADER, sid);
            for (name, value) in &self.headers {
                req = req.header(name.as_str(), value.as_str());
            }
            if let Ok(Some(bearer)) = self.bearer(false).await {
                req = req.header("Authorization", bearer);
            }
            match req.send().await {
                Ok(resp) => debug!(status = %resp.status(), "session DELETE sent"),
                Err(e) => debug!(error = %e, "session DELETE failed"),
            }
        }
    }

    fn mcp_session_id(&self) -> Option<String> {
        self.session_id.lock().expect("poisoned").clone()
    }

    fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.lock().expect("poisoned") = Some(version.to_string());
    }
}

/// Whether a 404 body signals that the server dropped our session.
///
/// Matches the documented phrasings plus the conservative rule that a 404
/// which never mentions a tool is a session rejection.
pub(crate) fn is_session_expired_message(body: &str) -> bool {
    let lower = body.to_lowercase();
    const PHRASES: &[&str] = &[
        "session not found",
        "session expired",
        "invalid session",
        "session is no longer valid",
    ];
    if PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }
    // "Session ID ... not found" and friends.
    if lower.contains("session") && lower.contains("not found") {
        return true;
    }
    !lower.contains("tool")
}

// ── SSE line parser ─────────────────────────────────────────────────────────

/// One server-sent event, data lines joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub data: String,
    pub id: Option<String>,
}

/// Incremental SSE parser. Feed complete lines; an empty line dispatches the
/// accumulated event. Event ids persist across events per the SSE spec.
#[derive(Default)]
pub(crate) struct SseParser {
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseEvent {
                data,
                id: self.id.clone(),
            });
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("id:") {
            self.id = Some(rest.trim().to_string());
        }
        // `event:`, `retry:` and comment lines are irrelevant here.
        None
    }
}

#[cfg(test)]
mod tests {
    use {
        mcport_secrets::{MemorySecretStore, OAuthCredentials, SecretStoreExt},
        secrecy::Secret,
    };

    use super::*;

    // ── Expiry detection ───────────────────────────────────────────────

    #[test]
    fn expiry_matches_documented_phrases() {
        for body in [
            "session not found",
            "Session abc123 not found",
            "Session ID 550e8400 not found",
            "session expired",
            "Invalid session",
            "the session is no longer valid",
        ] {
            assert!(is_session_expired_message(body), "should match: {body}");
        }
    }

    #[test]
    fn expiry_spares_tool_lookups() {
        assert!(!is_session_expired_message("tool 'echo' not found"));
        assert!(!is_session_expired_message("no such tool"));
    }

    #[test]
    fn bare_404_counts_as_expired() {
        assert!(is_session_expired_message("Not Found"));
        assert!(is_session_expired_message(""));
    }

    // ── SSE parsing ────────────────────────────────────────────────────

    #[test]
    fn sse_parser_single_event() {
        let mut parser = SseParser::default();
        assert!(parser.feed_line("event: message").is_none());
        assert!(parser.feed_line("data: {\"a\":1}").is_none());
        let event = parser.feed_line("").unwrap();
        assert_eq!(event.data, "{\"a\":1}");
        assert!(event.id.is_none());
    }

    #[test]
    fn sse_parser_multiline_data_and_id() {
        let mut parser = SseParser::default();
        parser.feed_line("id: evt-7");
        parser.feed_line("data: line1");
        parser.feed_line("data: line2");
        let event = parser.feed_line("").unwrap();
        assert_eq!(event.data, "line1\nline2");
        assert_eq!(event.id.as_deref(), Some("evt-7"));
    }

    #[test]
    fn sse_parser_id_persists_across_events() {
        let mut parser = SseParser::default();
        parser.feed_line("id: evt-1");
        parser.feed_line("data: a");
        parser.feed_line("");
        parser.feed_line("data: b");
        let second = parser.feed_line("").unwrap();
        assert_eq!(second.id.as_deref(), Some("evt-1"));
    }

    #[test]
    fn sse_parser_handles_crlf_and_comments() {
        let mut parser = SseParser::default();
        assert!(parser.feed_line(": keepalive\r").is_none());
        parser.feed_line("data: x\r");
        let event = parser.feed_line("\r").unwrap();
        assert_eq!(event.data, "x");
    }

    // ── Transport behaviour (mockito) ──────────────────────────────────

    fn transport_for(url: &str) -> Arc<HttpTransport> {
        HttpTransport::new(HttpTransportOptions {
            url: url.to_string(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(5),
            auth: None,
            initial_session_id: None,
        })
        .unwrap()
    }

    async fn next_frame(
        rx: &mut mpsc::UnboundedReceiver<InboundFrame>,
    ) -> InboundFrame {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("frames channel closed")
    }

    #[tokio::test]
    async fn post_with_json_response_yields_frame_and_session_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("accept", "application/json, text/event-stream")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "sess-42")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let transport = transport_for(&server.url());
        let mut frames = transport.take_frames().await.unwrap();

        transport
            .send(serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .await
            .unwrap();

        match next_frame(&mut frames).await {
            InboundFrame::Response(resp) => assert_eq!(resp.id_as_i64(), Some(1)),
            other => panic!("expected response frame, got {other:?}"),
        }
        assert_eq!(transport.mcp_session_id().as_deref(), Some("sess-42"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn post_with_sse_body_yields_frames() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "event: message\n\
                 data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\
                 \n\
                 data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n\
                 \n",
            )
            .create_async()
            .await;

        let transport = transport_for(&server.url());
        let mut frames = transport.take_frames().await.unwrap();

        transport
            .send(serde_json::json!({"jsonrpc":"2.0","id":2,"method":"tools/call"}))
            .await
            .unwrap();

        assert!(matches!(
            next_frame(&mut frames).await,
            InboundFrame::Notification(_)
        ));
        match next_frame(&mut frames).await {
            InboundFrame::Response(resp) => assert_eq!(resp.id_as_i64(), Some(2)),
            other => panic!("expected response frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notification_accepted_with_202() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(202).create_async().await;

        let transport = transport_for(&server.url());
        transport
            .send(serde_json::json!({"jsonrpc":"2.0","method":"notifications/initialized"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_session_404_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(404)
            .with_body("Session ID 550e8400 not found")
            .create_async()
            .await;

        let transport = transport_for(&server.url());
        let err = transport
            .send(serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn tool_404_is_network_error_not_expiry() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(404)
            .with_body("tool 'frobnicate' not found")
            .create_async()
            .await;

        let transport = transport_for(&server.url());
        let err = transport
            .send(serde_json::json!({"jsonrpc":"2.0","id":1,"method":"tools/call"}))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn unauthorized_without_token_manager_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(401).create_async().await;

        let transport = transport_for(&server.url());
        let err = transport
            .send(serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn unauthorized_triggers_single_refresh_and_retry() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        // Stale bearer is rejected, fresh bearer succeeds. Mock matching is
        // header-driven so ordering does not matter.
        let rejected = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer stale-token")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer fresh-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/.well-known/oauth-authorization-server")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({ "token_endpoint": format!("{base}/token") }).to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({ "access_token": "fresh-token", "expires_in": 3600 })
                    .to_string(),
            )
            .create_async()
            .await;

        let secrets = Arc::new(MemorySecretStore::new());
        secrets
            .set_oauth(&base, "default", &OAuthCredentials {
                client_id: "c1".into(),
                client_secret: None,
                access_token: Secret::new("stale-token".into()),
                refresh_token: Some(Secret::new("rt".into())),
                token_type: "Bearer".into(),
                // Far-future expiry: the token looks valid until the server
                // says otherwise.
                expires_at: Some(mcport_common::paths::now_unix() + 3600),
                scope: None,
            })
            .unwrap();
        let auth = Arc::new(TokenManager::new(&base, "default", secrets as _));

        let transport = HttpTransport::new(HttpTransportOptions {
            url: base.clone(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(5),
            auth: Some(auth),
            initial_session_id: None,
        })
        .unwrap();
        let mut frames = transport.take_frames().await.unwrap();

        transport
            .send(serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .await
            .unwrap();
        assert!(matches!(
            next_frame(&mut frames).await,
            InboundFrame::Response(_)
        ));

        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn background_stream_delivers_notifications_and_records_event_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .match_header("accept", "text/event-stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "id: evt-9\n\
                 data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/tools/list_changed\"}\n\
                 \n",
            )
            .create_async()
            .await;

        let transport = transport_for(&server.url());
        let mut frames = transport.take_frames().await.unwrap();
        transport.start_stream().await.unwrap();

        match next_frame(&mut frames).await {
            InboundFrame::Notification(notif) => {
                assert_eq!(notif.method, "notifications/tools/list_changed");
            },
            other => panic!("expected notification, got {other:?}"),
        }
        assert_eq!(
            transport.last_event_id.lock().unwrap().as_deref(),
            Some("evt-9")
        );
        transport.stop().await;
    }

    #[tokio::test]
    async fn stream_reconnect_sends_last_event_id() {
        let mut server = mockito::Server::new_async().await;
        // Mockito gives the most recently created matching mock precedence,
        // so the bare mock goes first and the header-matched resume mock
        // second: initial connections (no Last-Event-ID) fall through to
        // the bare one.
        server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "id: evt-1\n\
                 data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/first\"}\n\
                 \n",
            )
            .create_async()
            .await;
        let resumed = server
            .mock("GET", "/")
            .match_header("last-event-id", "evt-1")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/resumed\"}\n\n")
            .expect_at_least(1)
            .create_async()
            .await;

        let transport = transport_for(&server.url());
        let mut frames = transport.take_frames().await.unwrap();
        transport.start_stream().await.unwrap();

        // First event arrives from the initial connection.
        match next_frame(&mut frames).await {
            InboundFrame::Notification(n) => assert_eq!(n.method, "notifications/first"),
            other => panic!("unexpected frame {other:?}"),
        }
        // The resumed connection carries Last-Event-ID: evt-1.
        match next_frame(&mut frames).await {
            InboundFrame::Notification(n) => assert_eq!(n.method, "notifications/resumed"),
            other => panic!("unexpected frame {other:?}"),
        }

        transport.stop().await;
        resumed.assert_async().await;
    }

    #[tokio::test]
    async fn stop_sends_delete_with_session_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "sess-9")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/")
            .match_header("mcp-session-id", "sess-9")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let transport = transport_for(&server.url());
        transport
            .send(serde_json::json!({"jsonrpc":"2.0","id":1,"method":"initialize"}))
            .await
            .unwrap();
        transport.stop().await;

        delete.assert_async().await;
    }
}
