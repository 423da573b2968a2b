//! Run subcommand implementation

use agentlink::common::{DEFAULT_LOCAL_PORT, DEFAULT_SERVER_URL, MAX_RECONNECT_ATTEMPTS};
use agentlink::{AgentTunnel, TunnelState};
use agentlink_observability::{init_logging, LoggingConfig};
use anyhow::{Context, Result};
use clap::Args;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Proxy base URL (http, https, ws or wss)
    #[arg(long, default_value = DEFAULT_SERVER_URL, env = "AGENTLINK_SERVER_URL")]
    server_url: String,

    /// API key. If omitted, uses OPENSERV_API_KEY env var, or prompts securely.
    #[arg(long, env = "OPENSERV_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Port of the local agent server
    #[arg(long, default_value_t = DEFAULT_LOCAL_PORT, env = "PORT")]
    port: u16,

    /// Host of the local agent server
    #[arg(long, default_value = "localhost", env = "AGENTLINK_LOCAL_HOST")]
    local_host: String,

    /// Reconnect attempts before giving up
    #[arg(long, default_value_t = MAX_RECONNECT_ATTEMPTS)]
    max_reconnect_attempts: u32,

    /// WebSocket handshake timeout, in seconds
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Timeout for one forwarded request, in seconds
    #[arg(long, default_value_t = 120)]
    request_timeout: u64,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "AGENTLINK_JSON_LOGS")]
    json_logs: bool,
}

/// Resolve the API key from args/env, then a secure prompt.
fn resolve_api_key(args: &RunArgs) -> Result<String> {
    if let Some(ref key) = args.api_key {
        return Ok(key.clone());
    }
    prompt_api_key()
}

/// Prompt for the API key on TTY without echoing (secure input).
fn prompt_api_key() -> Result<String> {
    rpassword::prompt_password("API key: ").context(
        "Could not read API key from terminal (is stdin a TTY?). Set OPENSERV_API_KEY or pass --api-key",
    )
}

/// Wait for Ctrl+C, or SIGTERM on unix. Returns the signal's name.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                Ok("Ctrl+C")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        Ok("Ctrl+C")
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    init_logging(&LoggingConfig {
        level: args.log_level.clone(),
        json: args.json_logs,
        with_target: true,
    })
    .context("Failed to initialize logging")?;

    info!("Starting agentlink v{}", env!("CARGO_PKG_VERSION"));

    let api_key = resolve_api_key(&args)?;

    let tunnel = AgentTunnel::builder()
        .server_url(&args.server_url)
        .api_key(api_key)
        .local_host(&args.local_host)
        .max_reconnect_attempts(args.max_reconnect_attempts)
        .connect_timeout(Duration::from_secs(args.connect_timeout))
        .request_timeout(Duration::from_secs(args.request_timeout))
        .on_connected(|is_reconnect| {
            if is_reconnect {
                info!("Tunnel re-established");
            }
        })
        .on_error(|err| error!("Tunnel error: {}", err))
        .build()
        .context("Invalid tunnel configuration")?;

    let registration = tokio::select! {
        result = tunnel.start(args.port) => result.context("Failed to start tunnel")?,
        signal = shutdown_signal() => {
            info!("{} received before the tunnel was established", signal?);
            tunnel.stop().await?;
            return Ok(());
        }
    };

    info!(
        "Forwarding {} -> http://{}:{}",
        registration.public_url, args.local_host, args.port
    );

    let mut states = tunnel.subscribe_state();
    let failed = tokio::select! {
        signal = shutdown_signal() => {
            info!("{} received, shutting down", signal?);
            false
        }
        _ = states.wait_for(|state| *state == TunnelState::Failed) => true,
    };

    tunnel.stop().await.context("Failed to stop tunnel")?;
    if failed {
        warn!("Tunnel gave up reconnecting");
        anyhow::bail!("tunnel failed permanently");
    }
    info!("Tunnel stopped");
    Ok(())
}
