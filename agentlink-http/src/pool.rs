//! Keep-alive connection pool for HTTP/1.1 connections to the local agent
//!
//! Idle connections are kept in a LIFO queue per target address, so the
//! most recently used (and most likely still alive) connection is reused
//! first. A background task evicts expired entries until the pool is
//! dropped.

use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use agentlink_common::{ForwardConfig, TunnelError};

const EVICTION_INTERVAL: Duration = Duration::from_secs(30);

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per host (default: 32)
    pub max_idle_per_host: usize,
    /// Idle timeout for connections (default: 90s)
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

impl From<&ForwardConfig> for PoolConfig {
    fn from(config: &ForwardConfig) -> Self {
        Self {
            max_idle_per_host: config.max_idle_connections,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// Connection pool errors
#[derive(Debug, Error)]
pub enum ConnectionPoolError {
    #[error("Failed to connect to {addr}: {reason}")]
    Connection { addr: String, reason: String },
    #[error("Handshake error: {0}")]
    Handshake(String),
}

impl From<ConnectionPoolError> for TunnelError {
    fn from(err: ConnectionPoolError) -> Self {
        TunnelError::Forward(err.to_string())
    }
}

pub(crate) type Sender = http1::SendRequest<Full<Bytes>>;

struct IdleConnection {
    sender: Sender,
    last_used: Instant,
}

type IdleQueue = Mutex<VecDeque<IdleConnection>>;

/// Pool of HTTP/1.1 connections to one address
pub struct ConnectionPool {
    target_addr: String,
    config: PoolConfig,
    idle: Arc<IdleQueue>,
}

impl ConnectionPool {
    pub fn new(target_addr: String, config: PoolConfig) -> Self {
        let pool = Self {
            target_addr,
            config,
            idle: Arc::new(Mutex::new(VecDeque::new())),
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            let idle = Arc::downgrade(&pool.idle);
            let timeout = pool.config.idle_timeout;
            tokio::spawn(evict_loop(idle, timeout));
        }

        pool
    }

    pub fn target_addr(&self) -> &str {
        &self.target_addr
    }

    /// Reuse an idle connection or open a new one.
    pub(crate) async fn acquire(&self) -> Result<Sender, ConnectionPoolError> {
        {
            let mut idle = self.idle.lock().await;
            while let Some(conn) = idle.pop_back() {
                if !conn.sender.is_closed() && conn.last_used.elapsed() < self.config.idle_timeout
                {
                    debug!("Reusing pooled connection to {}", self.target_addr);
                    return Ok(conn.sender);
                }
                debug!("Discarding expired connection to {}", self.target_addr);
            }
        }

        debug!("Opening connection to {}", self.target_addr);
        let stream = TcpStream::connect(&self.target_addr).await.map_err(|e| {
            ConnectionPoolError::Connection {
                addr: self.target_addr.clone(),
                reason: e.to_string(),
            }
        })?;
        let _ = stream.set_nodelay(true);

        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ConnectionPoolError::Handshake(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Local connection error: {:?}", e);
            }
        });

        Ok(sender)
    }

    /// Return a connection whose last response was fully read.
    pub(crate) async fn release(&self, sender: Sender) {
        if sender.is_closed() {
            debug!("Not returning closed connection to pool");
            return;
        }

        let mut idle = self.idle.lock().await;
        if idle.len() >= self.config.max_idle_per_host {
            debug!("Pool for {} full, dropping connection", self.target_addr);
            return;
        }
        idle.push_back(IdleConnection {
            sender,
            last_used: Instant::now(),
        });
    }

    #[cfg(test)]
    pub(crate) async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Drop closed and expired idle connections.
    #[cfg(test)]
    pub(crate) async fn evict_expired(&self) {
        evict(&self.idle, self.config.idle_timeout).await;
    }
}

async fn evict_loop(idle: Weak<IdleQueue>, timeout: Duration) {
    loop {
        tokio::time::sleep(EVICTION_INTERVAL).await;
        let Some(idle) = idle.upgrade() else {
            break;
        };
        evict(&idle, timeout).await;
    }
}

async fn evict(idle: &IdleQueue, timeout: Duration) {
    let mut idle = idle.lock().await;
    let before = idle.len();
    idle.retain(|conn| !conn.sender.is_closed() && conn.last_used.elapsed() < timeout);
    let evicted = before - idle.len();
    if evicted > 0 {
        debug!("Evicted {} expired connections", evicted);
    }
}
