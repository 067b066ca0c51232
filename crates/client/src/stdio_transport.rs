//! Stdio transport: spawn a child MCP server and frame JSON-RPC as one
//! object per line over stdin/stdout. Stderr is captured for diagnostics.

use std::{collections::BTreeMap, process::Stdio, sync::Arc};

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, Command},
        sync::{Mutex, mpsc},
    },
    tracing::{debug, info, warn},
};

use mcport_common::{Error, Result};

use crate::{
    transport::{InboundFrame, McpTransport},
    types::JsonRpcMessage,
};

/// Stdio transport for a child MCP server process.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    frames_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stderr_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader loops.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Arc<Self>> {
        info!(command = %command, args = ?args, "spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::network(format!("failed to spawn MCP server '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::network("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::network("failed to capture child stdout"))?;
        let stderr = child.stderr.take();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        // Log whatever the server writes to stderr.
        let stderr_handle = stderr.map(|stderr| {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                warn!(stderr = %trimmed, "MCP server stderr");
                            }
                        },
                    }
                }
            })
        });

        // Decode stdout lines into frames. A closed stdout is fatal for
        // every outstanding request.
        let reader_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("MCP server stdout closed");
                        break;
                    },
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(trimmed) {
                            Ok(value) => match JsonRpcMessage::parse(value) {
                                Ok(JsonRpcMessage::Response(resp)) => {
                                    let _ = frames_tx.send(InboundFrame::Response(resp));
                                },
                                Ok(JsonRpcMessage::Notification(notif)) => {
                                    let _ = frames_tx.send(InboundFrame::Notification(notif));
                                },
                                Ok(JsonRpcMessage::ServerRequest(req)) => {
                                    debug!(
                                        method = ?req.get("method"),
                                        "ignoring server-initiated request"
                                    );
                                },
                                Err(e) => {
                                    debug!(error = %e, "undecodable frame from server");
                                },
                            },
                            Err(e) => {
                                debug!(error = %e, line = %trimmed, "non-JSON line from server");
                            },
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "error reading MCP server stdout");
                        break;
                    },
                }
            }
            let closed = Error::network("MCP server process closed the transport");
            let _ = frames_tx.send(InboundFrame::fatal(&closed));
        });

        Ok(Arc::new(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            frames_rx: Mutex::new(Some(frames_rx)),
            reader_handle: Mutex::new(Some(reader_handle)),
            stderr_handle: Mutex::new(stderr_handle),
        }))
    }

    /// Whether the child process is still running.
    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn start(&self) -> Result<()> {
        // Readers start in `spawn`.
        Ok(())
    }

    async fn send(&self, message: serde_json::Value) -> Result<()> {
        let mut payload = serde_json::to_string(&message)?;
        payload.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| Error::network(format!("failed to write to MCP server stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::network(format!("failed to flush MCP server stdin: {e}")))?;
        Ok(())
    }

    async fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<InboundFrame>> {
        self.frames_rx.lock().await.take()
    }

    async fn stop(&self) {
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.stderr_handle.lock().await.take() {
            handle.abort();
        }
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}
