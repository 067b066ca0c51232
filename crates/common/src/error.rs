use thiserror::Error;

/// Error taxonomy shared across all mcport crates.
///
/// Every failure a caller can observe collapses into one of these kinds; the
/// CLI maps them to process exit codes and the bridge maps them onto the IPC
/// wire. MCP protocol errors keep their original JSON-RPC code and message.
#[derive(Debug, Error)]
pub enum Error {
    /// User or input error (bad session name, unknown session, malformed args).
    #[error("{0}")]
    Client(String),

    /// Missing, expired, or invalid credentials.
    #[error("{0}")]
    Auth(String),

    /// Transport-level failure: unreachable server, timeout, closed pipe.
    #[error("{0}")]
    Network(String),

    /// The server rejected our `MCP-Session-Id`. Never retried.
    #[error("{0}")]
    SessionExpired(String),

    /// A JSON-RPC error frame from the MCP server, preserved verbatim.
    #[error("MCP error {code}: {message}")]
    Mcp { code: i64, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    #[must_use]
    pub fn session_expired(message: impl Into<String>) -> Self {
        Self::SessionExpired(message.into())
    }

    #[must_use]
    pub fn mcp(code: i64, message: impl Into<String>) -> Self {
        Self::Mcp {
            code,
            message: message.into(),
        }
    }

    /// Process exit code for the CLI: 0 success, 1 client error, 2 auth
    /// error, 3 network error, 4 session expired.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Auth(_) => 2,
            Self::Network(_) => 3,
            Self::SessionExpired(_) => 4,
            _ => 1,
        }
    }

    /// Error code carried on the bridge IPC wire.
    ///
    /// Codes 1–4 are the taxonomy; MCP protocol errors keep their JSON-RPC
    /// code so both sides of the wire see the server's original error.
    #[must_use]
    pub fn ipc_code(&self) -> i64 {
        match self {
            Self::Auth(_) => 2,
            Self::Network(_) => 3,
            Self::SessionExpired(_) => 4,
            Self::Mcp { code, .. } => *code,
            _ => 1,
        }
    }

    /// Reconstruct an error from an IPC `{code, message}` pair.
    #[must_use]
    pub fn from_ipc(code: i64, message: String) -> Self {
        match code {
            1 => Self::Client(message),
            2 => Self::Auth(message),
            3 => Self::Network(message),
            4 => Self::SessionExpired(message),
            code => Self::Mcp { code, message },
        }
    }
}

impl Reason for Error {
    fn from_reason(reason: String) -> Self {
        Self::Client(reason)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Failure annotation ──────────────────────────────────────────────────────

/// An error type that can absorb a bare textual reason.
///
/// [`impl_annotate!`] builds on this so each crate's `Result` gets an
/// `annotate` combinator without hand-writing the plumbing per error type.
pub trait Reason: Sized {
    fn from_reason(reason: String) -> Self;
}

/// Emit an `Annotate` extension trait scoped to the calling module.
///
/// The module must already define an `Error` implementing [`Reason`] and a
/// matching `Result<T>` alias. `annotate` prefixes a failure (or stands in
/// for a missing `Option` value) with a description that is only rendered
/// when something actually went wrong:
///
/// ```ignore
/// std::fs::read(&path).annotate(|| format!("reading {}", path.display()))?;
/// ```
#[macro_export]
macro_rules! impl_annotate {
    () => {
        pub trait Annotate<T> {
            /// Wrap the failure with a lazily-built description.
            fn annotate<D, F>(self, describe: F) -> Result<T>
            where
                D: std::fmt::Display,
                F: FnOnce() -> D;
        }

        impl<T, E: std::fmt::Display> Annotate<T> for std::result::Result<T, E> {
            fn annotate<D, F>(self, describe: F) -> Result<T>
            where
                D: std::fmt::Display,
                F: FnOnce() -> D,
            {
                self.map_err(|cause| {
                    <Error as $crate::Reason>::from_reason(format!("{}: {cause}", describe()))
                })
            }
        }

        impl<T> Annotate<T> for Option<T> {
            fn annotate<D, F>(self, describe: F) -> Result<T>
            where
                D: std::fmt::Display,
                F: FnOnce() -> D,
            {
                self.ok_or_else(|| {
                    <Error as $crate::Reason>::from_reason(describe().to_string())
                })
            }
        }
    };
}

impl_annotate!();
