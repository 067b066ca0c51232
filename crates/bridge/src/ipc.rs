//! Bridge IPC wire format: line-delimited JSON over a Unix-domain stream
//! socket. Requests are `{id, method, params?}`, responses `{id, result}`
//! or `{id, error: {code, message}}`.

use serde::{Deserialize, Serialize};

use mcport_common::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub id: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i64,
    pub message: String,
}

impl IpcResponse {
    #[must_use]
    pub fn ok(id: i64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn err(id: i64, error: &Error) -> Self {
        Self {
            id,
            result: None,
            error: Some(IpcError {
                code: error.ipc_code(),
                message: error.to_string(),
            }),
        }
    }

    /// Convert back into the caller-side result.
    pub fn into_result(self) -> mcport_common::Result<serde_json::Value> {
        match self.error {
            Some(err) => Err(Error::from_ipc(err.code, err.message)),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// Encode a message as one wire line (newline-terminated).
pub fn encode_line<T: Serialize>(message: &T) -> mcport_common::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
