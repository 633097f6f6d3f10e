//! Server configuration loading
//!
//! Settings come from a small TOML file; every field except the shared
//! secret has a sensible default. Unknown keys are ignored so config files
//! can grow without breaking older builds.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_max_connections() -> usize {
    1024
}

/// Server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// IPv4 address to bind the listener to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Admission limit for simultaneous connections; 0 disables the limit
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Key material shared with every legitimate client
    pub shared_secret: String,
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("port must be in 1..=65535")]
    InvalidPort,

    #[error("shared_secret must not be empty")]
    EmptySecret,
}

impl ServerConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constraints a listening server depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.shared_secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        Ok(())
    }
}
