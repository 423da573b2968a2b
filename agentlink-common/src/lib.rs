//! Common utilities and types for `agentlink`

pub mod config;
pub mod constants;
pub mod error;

pub use config::{BackoffConfig, ForwardConfig, TunnelConfig};
pub use constants::{
    ACK_TIMEOUT, CLOSE_GRACE_PERIOD, DEFAULT_LOCAL_PORT, DEFAULT_SERVER_URL, ENCODING_BASE64,
    ENCODING_HEADER, MAX_API_KEY_LEN, MAX_RECONNECT_ATTEMPTS, MAX_RESPONSE_BYTES,
    REQUEST_TIMEOUT, TUNNEL_PATH,
};
pub use error::{AuthErrorCode, Result, TunnelError};
