//! Secret payload models. These only ever round-trip through the keychain.

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// OAuth credential triple plus client registration, keychain-only.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    pub client_id: String,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix seconds when the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value. Use only for
/// payloads that go to the keychain, never for files or logs.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> OAuthCredentials {
        OAuthCredentials {
            client_id: "client-1".into(),
            client_secret: None,
            access_token: Secret::new("at-secret".into()),
            refresh_token: Some(Secret::new("rt-secret".into())),
            token_type: "Bearer".into(),
            expires_at: Some(1_700_000_000),
            scope: Some("read write".into()),
        }
    }

    #[test]
    fn serialization_is_camel_case() {
        let json = serde_json::to_value(creds()).unwrap();
        assert_eq!(json["clientId"], "client-1");
        assert_eq!(json["accessToken"], "at-secret");
        assert_eq!(json["refreshToken"], "rt-secret");
        assert_eq!(json["tokenType"], "Bearer");
        assert_eq!(json["expiresAt"], 1_700_000_000u64);
    }

    #[test]
    fn deserialization_roundtrip() {
        let json = serde_json::to_string(&creds()).unwrap();
        let back: OAuthCredentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back.access_token.expose_secret(), "at-secret");
        assert_eq!(
            back.refresh_token.unwrap().expose_secret(),
            "rt-secret"
        );
    }

    #[test]
    fn debug_redacts_tokens() {
        let dbg = format!("{:?}", creds());
        assert!(!dbg.contains("at-secret"));
        assert!(!dbg.contains("rt-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn token_type_defaults_to_bearer() {
        let json = r#"{"clientId":"c","accessToken":"t"}"#;
        let creds: OAuthCredentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.token_type, "Bearer");
    }
}
