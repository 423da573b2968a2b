//! # `agentlink`
//!
//! Expose an agent's local HTTP server to the outside world through a
//! remote proxy, without opening any inbound port.
//!
//! The agent dials out to the proxy over a WebSocket, authenticates with
//! its API key and then answers HTTP requests relayed over that
//! connection. The tunnel reconnects on its own with exponential backoff
//! and supports graceful reconnects during which the proxy buffers
//! traffic.
//!
//! ## Architecture
//!
//! - [`agentlink-common`] - errors, configuration and constants
//! - [`agentlink-protocol`] - JSON wire messages and header helpers
//! - [`agentlink-core`] - transport, state machine and request routing
//! - [`agentlink-http`] - pooled forwarding to the local server
//!
//! See [`AgentTunnel`] for the entry point.

mod config;
mod tunnel;

pub use agentlink_common as common;
pub use agentlink_core as tunnel_core;
pub use agentlink_http as http;
pub use agentlink_protocol as protocol;

pub use config::AgentTunnelConfig;
pub use tunnel::{AgentTunnel, AgentTunnelBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::common::{Result, TunnelError};
    pub use crate::protocol::{Registration, RequestData};
    pub use crate::tunnel_core::{TunnelEvent, TunnelState};
    pub use crate::{AgentTunnel, AgentTunnelBuilder};
}

pub use common::{AuthErrorCode, BackoffConfig, ForwardConfig, Result, TunnelConfig, TunnelError};
pub use protocol::{Registration, RequestData};
pub use tunnel_core::{Callbacks, TunnelEvent, TunnelState};
