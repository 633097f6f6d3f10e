//! Encrypted chat server - entry point
//!
//! Loads the TOML configuration, binds the listener, and serves until
//! interrupted.

use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use sealchat::{Server, ServerConfig};

/// Config file used when no path is given on the command line.
const DEFAULT_CONFIG_PATH: &str = "configs/server.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level, e.g. RUST_LOG=sealchat=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sealchat=info")),
        )
        .init();

    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = ServerConfig::from_file(&path)?;
    info!(
        "config loaded from {} (secret length: {})",
        path,
        config.shared_secret.len()
    );

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    Ok(())
}
