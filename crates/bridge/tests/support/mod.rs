//! Shared scaffolding for bridge integration tests: a scripted transport
//! behind the `ConnectionSource` seam.
#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use tokio::sync::{Mutex, mpsc, watch};

use {
    mcport_bridge::{BridgeService, Connection, ConnectionSource},
    mcport_client::{ClientCore, InboundFrame, McpTransport},
    mcport_common::Result,
    mcport_registry::{SessionRecord, SessionRegistry, TransportConfig},
};

/// Scripted reply function: gets each sent envelope, returns the frames to
/// push back (or an error the transport surfaces for that send).
pub type Responder =
    Arc<dyn Fn(&serde_json::Value) -> Result<Vec<serde_json::Value>> + Send + Sync>;

pub struct FakeTransport {
    frames_tx: mpsc::UnboundedSender<InboundFrame>,
    frames_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
    responder: Responder,
}

impl FakeTransport {
    pub fn new(responder: Responder) -> Arc<Self> {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            frames_tx,
            frames_rx: Mutex::new(Some(frames_rx)),
            responder,
        })
    }

    /// Inject a server-initiated notification.
    pub fn push_notification(&self, method: &str) {
        let _ = self.frames_tx.send(InboundFrame::Notification(
            serde_json::from_value(serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
            }))
            .unwrap(),
        ));
    }

    /// Inject a fatal transport failure.
    pub fn push_fatal(&self, code: i64, message: &str) {
        let _ = self.frames_tx.send(InboundFrame::Fatal {
            code,
            message: message.to_string(),
        });
    }
}

#[async_trait::async_trait]
impl McpTransport for FakeTransport {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, message: serde_json::Value) -> Result<()> {
        for value in (self.responder)(&message)? {
            match mcport_client::types::JsonRpcMessage::parse(value).unwrap() {
                mcport_client::types::JsonRpcMessage::Response(r) => {
                    let _ = self.frames_tx.send(InboundFrame::Response(r));
                },
                mcport_client::types::JsonRpcMessage::Notification(n) => {
                    let _ = self.frames_tx.send(InboundFrame::Notification(n));
                },
                mcport_client::types::JsonRpcMessage::ServerRequest(_) => {},
            }
        }
        Ok(())
    }

    async fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<InboundFrame>> {
        self.frames_rx.lock().await.take()
    }

    async fn stop(&self) {}
}

/// Responder that answers the handshake and delegates everything else.
pub fn with_handshake(inner: Responder) -> Responder {
    Arc::new(move |msg: &serde_json::Value| {
        let id = msg.get("id").and_then(|i| i.as_i64());
        match (msg.get("method").and_then(|m| m.as_str()), id) {
            (Some("initialize"), Some(id)) => Ok(vec![serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {"tools": {"listChanged": true}},
                    "serverInfo": {"name": "fake-upstream", "version": "0.0.1"},
                    "instructions": "fake server for tests",
                },
            })]),
            (Some("notifications/initialized"), _) => Ok(vec![]),
            (Some("ping"), Some(id)) => Ok(vec![serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {},
            })]),
            _ => inner(msg),
        }
    })
}

/// `ConnectionSource` producing scripted connections; remembers the latest
/// transport so tests can inject frames.
pub struct FakeSource {
    responder: Responder,
    pub last_transport: StdMutex<Option<Arc<FakeTransport>>>,
}

impl FakeSource {
    pub fn new(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            responder,
            last_transport: StdMutex::new(None),
        })
    }

    pub fn transport(&self) -> Arc<FakeTransport> {
        self.last_transport
            .lock()
            .unwrap()
            .clone()
            .expect("no connection made yet")
    }
}

/// Newtype so an `Arc<FakeSource>` can travel as `Box<dyn ConnectionSource>`
/// while the test keeps its own handle.
pub struct SourceHandle(pub Arc<FakeSource>);

#[async_trait::async_trait]
impl ConnectionSource for SourceHandle {
    async fn connect(
        &self,
        _resume_session: Option<(String, Option<String>)>,
    ) -> Result<Connection> {
        let transport = FakeTransport::new(Arc::clone(&self.0.responder));
        *self.0.last_transport.lock().unwrap() = Some(Arc::clone(&transport));

        let core = Arc::new(ClientCore::new(
            transport as Arc<dyn McpTransport>,
            Duration::from_secs(2),
        ));
        core.start().await?;
        let handshake = Some(core.initialize("mcport-test").await?);
        Ok(Connection { core, handshake })
    }
}

pub struct Harness {
    pub service: Arc<BridgeService>,
    pub source: Arc<FakeSource>,
    pub registry: SessionRegistry,
    pub shutdown_rx: watch::Receiver<bool>,
    pub dir: tempfile::TempDir,
}

/// Build a registry-backed service around a scripted responder.
pub async fn harness(session: &str, responder: Responder) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let registry = SessionRegistry::open(dir.path().join("sessions.json"));
    registry
        .save(SessionRecord::new(session, &TransportConfig::Stdio {
            command: "unused".into(),
            args: vec![],
            env: BTreeMap::new(),
        }))
        .await
        .unwrap();

    let source = FakeSource::new(with_handshake(responder));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = BridgeService::start(
        session,
        registry.clone(),
        Box::new(SourceHandle(Arc::clone(&source))),
        Duration::from_secs(300),
        None,
        shutdown_tx,
    )
    .await
    .unwrap();

    Harness {
        service,
        source,
        registry,
        shutdown_rx,
        dir,
    }
}
