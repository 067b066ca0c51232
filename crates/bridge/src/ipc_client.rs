//! CLI-side IPC stub: connect, write one request, read one response, close.

use std::{path::PathBuf, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
};

use mcport_common::{Error, Result};

use crate::ipc::{IpcRequest, IpcResponse, encode_line};

/// One-shot request client for a bridge socket.
pub struct IpcClient {
    socket: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    #[must_use]
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: Duration::from_millis(mcport_common::DEFAULT_IPC_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Issue one request and await its response within the client timeout.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        tokio::time::timeout(self.timeout, self.request_inner(method, params))
            .await
            .map_err(|_| {
                Error::network(format!(
                    "bridge did not answer '{method}' within {}ms",
                    self.timeout.as_millis()
                ))
            })?
    }

    async fn request_inner(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            Error::network(format!(
                "failed to connect to bridge socket {}: {e}",
                self.socket.display()
            ))
        })?;
        let (read_half, mut write_half) = stream.into_split();

        let request = IpcRequest {
            id: 1,
            method: method.to_string(),
            params,
        };
        write_half
            .write_all(encode_line(&request)?.as_bytes())
            .await
            .map_err(|e| Error::network(format!("failed to write IPC request: {e}")))?;
        write_half
            .flush()
            .await
            .map_err(|e| Error::network(format!("failed to flush IPC request: {e}")))?;

        let mut lines = BufReader::new(read_half).lines();
        let line = lines
            .next_line()
            .await
            .map_err(|e| Error::network(format!("failed to read IPC response: {e}")))?
            .ok_or_else(|| Error::network("bridge closed the connection without a response"))?;

        let response: IpcResponse = serde_json::from_str(line.trim())
            .map_err(|e| Error::network(format!("malformed IPC response: {e}")))?;
        response.into_result()
    }

    /// Lightweight liveness probe with its own (short) deadline.
    pub async fn ping(&self, deadline: Duration) -> bool {
        let probe = Self {
            socket: self.socket.clone(),
            timeout: deadline,
        };
        probe.request("ping", None).await.is_ok()
    }
}
