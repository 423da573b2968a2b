//! Embeddable agent tunnel with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentlink::AgentTunnel;
//!
//! # async fn example() -> agentlink::Result<()> {
//! let tunnel = AgentTunnel::builder()
//!     .api_key("my-api-key")
//!     .on_connected(|is_reconnect| println!("connected (reconnect: {is_reconnect})"))
//!     .build()?;
//!
//! let registration = tunnel.start(7378).await?;
//! println!("Public URL: {}", registration.public_url);
//!
//! tunnel.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::AgentTunnelConfig;
use agentlink_common::{BackoffConfig, Result, TunnelError};
use agentlink_core::transport::WsConnector;
use agentlink_core::{Callbacks, Connector, Tunnel, TunnelState};
use agentlink_http::LocalForwarder;
use agentlink_protocol::{Registration, RequestData};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// A tunnel exposing a local agent server through the proxy.
///
/// Use [`AgentTunnel::builder()`] to create one. Dropping the last clone
/// stops the tunnel.
#[derive(Debug, Clone)]
pub struct AgentTunnel {
    config: AgentTunnelConfig,
    tunnel: Tunnel,
}

/// Builder for constructing an [`AgentTunnel`].
#[derive(Default)]
pub struct AgentTunnelBuilder {
    config: AgentTunnelConfig,
    callbacks: Callbacks,
    connector: Option<Arc<dyn Connector>>,
}

impl AgentTunnel {
    /// Create a new builder.
    pub fn builder() -> AgentTunnelBuilder {
        AgentTunnelBuilder::default()
    }

    /// Connect, authenticate and start forwarding to `local_port`.
    ///
    /// Resolves once the proxy has registered the tunnel. Later disconnects
    /// are retried silently; only setup errors, rejected credentials and
    /// exhausted retries fail this call.
    pub async fn start(&self, local_port: u16) -> Result<Registration> {
        self.tunnel.start(local_port).await
    }

    /// Close the connection and stop reconnecting.
    pub async fn stop(&self) -> Result<()> {
        self.tunnel.stop().await
    }

    /// Reconnect without losing requests: the proxy buffers traffic until
    /// the new connection is registered.
    pub async fn graceful_reconnect(&self) -> Result<()> {
        self.tunnel.graceful_reconnect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.tunnel.is_connected().await
    }

    pub async fn registration(&self) -> Option<Registration> {
        self.tunnel.registration().await
    }

    pub fn state(&self) -> TunnelState {
        self.tunnel.state()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<TunnelState> {
        self.tunnel.subscribe_state()
    }

    /// Get the current configuration.
    pub fn config(&self) -> &AgentTunnelConfig {
        &self.config
    }
}

impl AgentTunnelBuilder {
    /// Proxy base URL (`http`, `https`, `ws` or `wss`).
    ///
    /// Default: `https://agents-proxy.openserv.ai`
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.tunnel.server_url = url.into();
        self
    }

    /// Credential sent in the auth frame.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.tunnel.api_key = Some(key.into());
        self
    }

    /// Retries allowed after a disconnect before the tunnel fails.
    ///
    /// Default: 10
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.tunnel.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.tunnel.backoff = backoff;
        self
    }

    /// Limit for one WebSocket handshake with the proxy. Ignored with a
    /// custom [`connector`](Self::connector).
    ///
    /// Default: 30 seconds
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Host of the local server.
    ///
    /// Default: `localhost`
    #[must_use]
    pub fn local_host(mut self, host: impl Into<String>) -> Self {
        self.config.forward.host = host.into();
        self
    }

    /// Timeout for one forwarded request.
    ///
    /// Default: 120 seconds
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.forward.request_timeout = timeout;
        self
    }

    /// Largest local response body that will be relayed.
    ///
    /// Default: 100 MiB
    #[must_use]
    pub fn max_response_bytes(mut self, limit: usize) -> Self {
        self.config.forward.max_response_bytes = limit;
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: AgentTunnelConfig) -> Self {
        self.config = config;
        self
    }

    /// Called each time the tunnel is registered; the flag is true for
    /// reconnects.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.callbacks.on_connected = Some(Arc::new(f));
        self
    }

    /// Called for each inbound request before it is forwarded.
    #[must_use]
    pub fn on_request(mut self, f: impl Fn(&RequestData) + Send + Sync + 'static) -> Self {
        self.callbacks.on_request = Some(Arc::new(f));
        self
    }

    /// Called when the tunnel fails for good.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&TunnelError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }

    /// Use a custom transport instead of WebSocket.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the tunnel. It stays idle until [`AgentTunnel::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no tokio
    /// runtime is running.
    pub fn build(self) -> Result<AgentTunnel> {
        self.config.validate()?;

        // A provider may already be installed by the host application.
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }

        let connect_timeout = self.config.connect_timeout;
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(WsConnector::new().with_connect_timeout(connect_timeout))
        });
        let forwarder = Arc::new(LocalForwarder::new(self.config.forward.clone()));
        let tunnel = Tunnel::spawn(
            self.config.tunnel.clone(),
            connector,
            forwarder,
            self.callbacks,
        )?;

        Ok(AgentTunnel {
            config: self.config,
            tunnel,
        })
    }
}

impl fmt::Debug for AgentTunnelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTunnelBuilder")
            .field("config", &self.config)
            .field("callbacks", &self.callbacks)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}
