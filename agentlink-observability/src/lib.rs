pub mod logging;

pub use logging::{init_logging, LoggingConfig};

/// Minimal logging setup: `RUST_LOG` or `info`, human-readable, no targets.
///
/// Does nothing if a subscriber is already installed.
pub fn init_minimal_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
