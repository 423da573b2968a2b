//! agentlink CLI
//!
//! Exposes a local agent HTTP server through the agents proxy.

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "agentlink",
    author,
    version,
    about = "Expose a local agent server through the agents proxy",
    long_about = "agentlink keeps an outbound WebSocket tunnel open to the agents proxy and \
                  forwards every request it receives to your local HTTP server.\n\n\
                  It reconnects on its own and can also be embedded as a library.",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel until interrupted
    Run(commands::run::RunArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
