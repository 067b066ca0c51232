//! Serde models for session records and auth profiles.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use mcport_common::{Error, Result, paths::now_unix};

/// Marker stored in place of real header values in `sessions.json`.
pub const REDACTED: &str = "<redacted>";

/// Transport descriptor for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    #[serde(rename_all = "camelCase")]
    Http {
        url: String,
        /// Header names with redacted values. Real values live in the
        /// secret store under `session:<name>:headers`.
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

fn default_timeout_ms() -> u64 {
    mcport_common::DEFAULT_TIMEOUT_MS
}

impl TransportConfig {
    /// Replace every header value with the redaction marker.
    #[must_use]
    pub fn redacted(&self) -> Self {
        match self {
            Self::Http {
                url,
                headers,
                timeout_ms,
            } => Self::Http {
                url: url.clone(),
                headers: headers
                    .keys()
                    .map(|k| (k.clone(), REDACTED.to_string()))
                    .collect(),
                timeout_ms: *timeout_ms,
            },
            stdio @ Self::Stdio { .. } => stdio.clone(),
        }
    }

    /// One-line human summary for listings.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Http { url, .. } => format!("http {url}"),
            Self::Stdio { command, args, .. } => {
                if args.is_empty() {
                    format!("stdio {command}")
                } else {
                    format!("stdio {command} {}", args.join(" "))
                }
            },
        }
    }
}

/// Session lifecycle state as recorded in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Live,
    Crashed,
    Expired,
}

/// Timestamp of the last `*/list_changed` notification for one list kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListStamp {
    pub list_changed_at: u64,
}

/// Per-kind notification timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NotificationStamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListStamp>,
}

impl NotificationStamps {
    pub fn touch(&mut self, kind: &str, at: u64) {
        let stamp = Some(ListStamp {
            list_changed_at: at,
        });
        match kind {
            "tools" => self.tools = stamp,
            "prompts" => self.prompts = stamp,
            "resources" => self.resources = stamp,
            _ => {},
        }
    }
}

/// Proxy server binding for a session, when enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

/// Tunables persisted on the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    pub ttl_ms: u64,
    pub timeout_ms: u64,
    pub refresh_buffer_sec: u64,
    pub lock_timeout_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ttl_ms: mcport_common::DEFAULT_TTL_MS,
            timeout_ms: mcport_common::DEFAULT_TIMEOUT_MS,
            refresh_buffer_sec: mcport_common::DEFAULT_REFRESH_BUFFER_SEC,
            lock_timeout_ms: mcport_common::DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

/// One session record in `sessions.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub name: String,
    pub transport: TransportConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub notifications: NotificationStamps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_config: Option<ProxyConfig>,
    #[serde(default)]
    pub options: SessionOptions,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SessionRecord {
    /// Fresh record for `connect`. The transport is stored redacted.
    #[must_use]
    pub fn new(name: &str, transport: &TransportConfig) -> Self {
        let now = now_unix();
        Self {
            name: name.to_string(),
            transport: transport.redacted(),
            profile_name: None,
            mcp_session_id: None,
            protocol_version: None,
            pid: None,
            socket_path: None,
            status: SessionStatus::Live,
            notifications: NotificationStamps::default(),
            proxy_config: None,
            options: SessionOptions::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Top-level shape of `sessions.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryFile {
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionRecord>,
}

/// Authentication mode of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    OAuth,
    #[default]
    None,
}

/// Auth-profile metadata. Token material lives only in the secret store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProfile {
    pub name: String,
    pub server_url: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_issuer: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<u64>,
}

/// Top-level shape of `auth-profiles.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfilesFile {
    /// `serverUrl -> profileName -> profile`.
    #[serde(default)]
    pub profiles: BTreeMap<String, BTreeMap<String, AuthProfile>>,
}

/// Validate a user-supplied session name: ASCII alphanumerics and `-` only.
pub fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::client("session name must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(Error::client(format!(
            "invalid session name '{name}': only alphanumerics and '-' are allowed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_transport_roundtrip() {
        let t = TransportConfig::Http {
            url: "https://mcp.example.com/mcp".into(),
            headers: BTreeMap::from([("X-Api-Key".to_string(), REDACTED.to_string())]),
            timeout_ms: 30_000,
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "http");
        assert_eq!(json["timeoutMs"], 30_000);
        let back: TransportConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn stdio_transport_roundtrip() {
        let t = TransportConfig::Stdio {
            command: "mcp-server-filesystem".into(),
            args: vec!["/tmp/x".into()],
            env: BTreeMap::from([("DEBUG".to_string(), "1".to_string())]),
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "stdio");
        let back: TransportConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn redaction_masks_header_values() {
        let t = TransportConfig::Http {
            url: "https://mcp.example.com".into(),
            headers: BTreeMap::from([("Authorization".to_string(), "Bearer hunter2".to_string())]),
            timeout_ms: 60_000,
        };
        let redacted = t.redacted();
        let json = serde_json::to_string(&redacted).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains(REDACTED));
        assert!(json.contains("Authorization"));
    }

    #[test]
    fn notification_touch_by_kind() {
        let mut stamps = NotificationStamps::default();
        stamps.touch("tools", 100);
        stamps.touch("resources", 200);
        assert_eq!(stamps.tools.unwrap().list_changed_at, 100);
        assert_eq!(stamps.resources.unwrap().list_changed_at, 200);
        assert!(stamps.prompts.is_none());
    }

    #[test]
    fn session_name_validation() {
        assert!(validate_session_name("my-session-1").is_ok());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("has space").is_err());
        assert!(validate_session_name("dot.dot").is_err());
        assert!(validate_session_name("../escape").is_err());
    }

    #[test]
    fn record_serializes_camel_case() {
        let rec = SessionRecord::new("s1", &TransportConfig::Stdio {
            command: "echo".into(),
            args: vec![],
            env: BTreeMap::new(),
        });
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["status"], "live");
    }
}
