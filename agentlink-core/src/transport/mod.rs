//! Transport layer abstraction for the tunnel control connection
//!
//! A [`Connector`] opens one full-duplex, message-framed connection and
//! reports what happens to it through a [`TransportEvents`] subscription.
//! The state machine creates a fresh subscription for every connection, so
//! events from an abandoned connection can be recognised and dropped.

use agentlink_common::{Result, TunnelError, TUNNEL_PATH};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

pub mod websocket;

pub use websocket::{WsConnector, CONNECT_TIMEOUT};

/// Something that happened on a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake finished; frames can be sent
    Opened,
    /// One text frame from the peer
    Message(String),
    /// The connection closed (close frame or EOF)
    Closed { code: Option<u16>, reason: String },
    /// The connection failed
    Error(String),
}

/// Subscription through which a transport reports its events
#[derive(Clone)]
pub struct TransportEvents {
    emit: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportEvents {
    pub fn new(emit: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.emit)(event);
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents").finish_non_exhaustive()
    }
}

/// Handle to one live (or opening) connection
///
/// A transport emits at most one terminal event (`Closed` or `Error`).
pub trait Transport: Send {
    /// Queue a text frame. Fails when the transport is not open.
    fn send(&self, text: String) -> Result<()>;

    /// Whether frames can currently be sent
    fn is_open(&self) -> bool;

    /// Start the close handshake. The returned future resolves once the
    /// connection is fully closed.
    fn close(&mut self) -> BoxFuture<'static, ()>;

    /// Drop the connection immediately, without a close handshake
    fn terminate(&mut self);
}

/// Opens transports
pub trait Connector: Send + Sync + 'static {
    /// Begin connecting to `url`. Returns immediately; progress is reported
    /// through `events`.
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport>;
}

/// Derive the tunnel WebSocket URL from the proxy base URL.
///
/// `http` becomes `ws`, `https` becomes `wss`, and the tunnel path is appended.
pub fn websocket_url(base: &str) -> Result<String> {
    let base = base.trim_end_matches('/');
    let upgraded = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else {
        return Err(TunnelError::Config(format!(
            "unsupported proxy URL scheme: {base}"
        )));
    };
    Ok(format!("{upgraded}{TUNNEL_PATH}"))
}
