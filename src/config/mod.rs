mod schema;

pub use schema::*;

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Monitor '{monitor}' references unknown server '{server}'")]
    UnknownServer { monitor: String, server: String },
    #[error("Invalid disk_space_threshold for server '{server}': {reason}")]
    InvalidDiskSpaceThreshold { server: String, reason: String },
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Cross-reference check: every monitored server name must have a
/// descriptor, and per-server threshold overrides must parse.
fn validate(config: &Config) -> Result<(), ConfigError> {
    for monitor in &config.monitors {
        for name in &monitor.servers {
            if !config.servers.iter().any(|s| &s.name == name) {
                return Err(ConfigError::UnknownServer {
                    monitor: monitor.name.clone(),
                    server: name.clone(),
                });
            }
        }
    }
    for server in &config.servers {
        if let Some(threshold) = &server.disk_space_threshold {
            threshold
                .parse::<crate::monitor::disk::DiskSpaceLimits>()
                .map_err(|reason| ConfigError::InvalidDiskSpaceThreshold {
                    server: server.name.clone(),
                    reason,
                })?;
        }
    }
    Ok(())
}
