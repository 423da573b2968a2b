//! Protocol constants and defaults shared by the library, CLI and tests.
//!
//! Use these instead of magic numbers so the tunnel, the forwarder and the
//! test harness agree on timings and limits.

use std::time::Duration;

/// Default proxy endpoint the CLI connects to.
pub const DEFAULT_SERVER_URL: &str = "https://agents-proxy.openserv.ai";

/// Path appended to the proxy URL when opening the WebSocket.
pub const TUNNEL_PATH: &str = "/ws";

/// Default local port of the agent HTTP server.
pub const DEFAULT_LOCAL_PORT: u16 = 7378;

/// Side-channel header marking a base64-encoded body.
pub const ENCODING_HEADER: &str = "x-openserv-encoding";

/// Value of [`ENCODING_HEADER`] for base64 bodies.
pub const ENCODING_BASE64: &str = "base64";

/// Retries allowed after a disconnect before the tunnel gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// How long to wait for `will-reconnect-ack` before reconnecting anyway.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// How long a closing transport may take before it is terminated.
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Timeout for one forwarded request against the local server.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound for a buffered local response body (100 MiB).
pub const MAX_RESPONSE_BYTES: usize = 100 * 1024 * 1024;

/// Longest credential accepted by the setup check.
pub const MAX_API_KEY_LEN: usize = 4096;
