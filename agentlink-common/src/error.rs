//! Error types for `agentlink`

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Subcode carried by an `error` frame from the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    /// The proxy gave up waiting for the auth frame
    Timeout,
    /// No credential was presented
    Required,
    /// The credential was rejected
    Failed,
    /// Any other server error
    Other,
}

impl AuthErrorCode {
    /// Classify the `error` field of an error frame.
    pub fn classify(code: &str) -> Self {
        if code.eq_ignore_ascii_case("AUTH_TIMEOUT") {
            Self::Timeout
        } else if code.eq_ignore_ascii_case("AUTH_REQUIRED") {
            Self::Required
        } else if code.eq_ignore_ascii_case("AUTH_FAILED") {
            Self::Failed
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "authentication timed out",
            Self::Required => "authentication required",
            Self::Failed => "authentication failed",
            Self::Other => "server error",
        };
        f.write_str(s)
    }
}

/// Main error type for `agentlink` operations
///
/// Cloneable so that one failure can settle every caller waiting on the
/// same coalesced operation.
#[derive(Error, Debug, Clone)]
pub enum TunnelError {
    /// IO error
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The proxy rejected the tunnel
    #[error("{code}: {message}")]
    Authentication { code: AuthErrorCode, message: String },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration or setup error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Reconnect budget exhausted
    #[error("Max reconnection attempts ({attempts}) reached")]
    MaxRetries { attempts: u32 },

    /// The tunnel was stopped before the operation completed
    #[error("Tunnel stopped")]
    Stopped,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Forwarding to the local server failed
    #[error("Forward error: {0}")]
    Forward(String),

    /// Local response exceeded the buffering cap
    #[error("Response body exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TunnelError>;

impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> Self {
        TunnelError::Io(Arc::new(err))
    }
}
