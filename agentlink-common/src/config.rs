//! Configuration types for the tunnel and the local forwarder

use crate::constants::{
    DEFAULT_SERVER_URL, MAX_RECONNECT_ATTEMPTS, MAX_RESPONSE_BYTES, REQUEST_TIMEOUT,
};
use crate::error::{Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect backoff configuration
///
/// The first retry is immediate; retry `n >= 2` waits `base * 2^(n-2)`,
/// clamped to `max`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay of the second attempt
    pub base: Duration,
    /// Maximum delay
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Tunnel connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Proxy base URL (http, https, ws or wss)
    pub server_url: String,
    /// Credential sent in the auth frame. Checked when the tunnel starts.
    pub api_key: Option<String>,
    /// Retries allowed after a disconnect before giving up
    pub max_reconnect_attempts: u32,
    /// Retry delays
    pub backoff: BackoffConfig,
}

impl TunnelConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_empty() {
            return Err(TunnelError::Config("server_url is required".into()));
        }
        let scheme_ok = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| self.server_url.starts_with(scheme));
        if !scheme_ok {
            return Err(TunnelError::Config(format!(
                "server_url must use http, https, ws or wss: {}",
                self.server_url
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(TunnelError::Config(
                "max_reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: None,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Local forwarder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Host of the local agent server
    pub host: String,
    /// Timeout for a whole forwarded request, body included
    pub request_timeout: Duration,
    /// Cap on a buffered response body
    pub max_response_bytes: usize,
    /// Idle connections kept per local port
    pub max_idle_connections: usize,
    /// How long an idle pooled connection stays usable
    pub idle_timeout: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            request_timeout: REQUEST_TIMEOUT,
            max_response_bytes: MAX_RESPONSE_BYTES,
            max_idle_connections: 32,
            idle_timeout: Duration::from_secs(90),
        }
    }
}
