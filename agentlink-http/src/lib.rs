//! Local HTTP forwarding for `agentlink`
//!
//! [`LocalForwarder`] replays requests received over the tunnel against
//! `localhost:<port>` using pooled keep-alive HTTP/1.1 connections, and
//! turns the responses into frames the proxy can decode.

pub mod forwarder;
pub mod pool;

pub use forwarder::{encode_response, LocalForwarder};
pub use pool::{ConnectionPool, ConnectionPoolError, PoolConfig};
