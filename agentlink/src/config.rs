//! Configuration for an embedded tunnel.

use agentlink_common::{ForwardConfig, Result, TunnelConfig, TunnelError};
use agentlink_core::transport::CONNECT_TIMEOUT;
use std::time::Duration;

/// Everything an [`AgentTunnel`](crate::AgentTunnel) needs besides callbacks.
///
/// Use [`AgentTunnelBuilder`](crate::AgentTunnelBuilder) for ergonomic construction.
#[derive(Debug, Clone)]
pub struct AgentTunnelConfig {
    /// Proxy connection and reconnect policy
    pub tunnel: TunnelConfig,

    /// How requests reach the local server
    pub forward: ForwardConfig,

    /// Limit for one WebSocket handshake with the proxy
    pub connect_timeout: Duration,
}

impl Default for AgentTunnelConfig {
    fn default() -> Self {
        Self {
            tunnel: TunnelConfig::default(),
            forward: ForwardConfig::default(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl AgentTunnelConfig {
    /// Validate the configuration.
    ///
    /// A missing API key is not an error here; `start()` reports it.
    pub fn validate(&self) -> Result<()> {
        self.tunnel.validate()?;
        if self.connect_timeout.is_zero() {
            return Err(TunnelError::Config(
                "connect_timeout must be greater than zero".into(),
            ));
        }
        if self.forward.host.is_empty() {
            return Err(TunnelError::Config("local host is required".into()));
        }
        if self.forward.request_timeout.is_zero() {
            return Err(TunnelError::Config(
                "request_timeout must be greater than zero".into(),
            ));
        }
        if self.forward.max_response_bytes == 0 {
            return Err(TunnelError::Config(
                "max_response_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
