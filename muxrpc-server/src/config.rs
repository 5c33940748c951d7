//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MUXRPC_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MUXRPC_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the stream transport binds to.
    pub bind_addr: SocketAddr,
    /// Address the HTTP transport binds to; `None` disables it.
    pub http_addr: Option<SocketAddr>,
    /// Maximum concurrent stream connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9999".parse().unwrap(),
            http_addr: Some("127.0.0.1:9980".parse().unwrap()),
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("MUXRPC_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
        if let Ok(addr) = std::env::var("MUXRPC_HTTP_BIND") {
            if addr.eq_ignore_ascii_case("none") {
                self.http_addr = None;
            } else if let Ok(parsed) = addr.parse() {
                self.http_addr = Some(parsed);
            }
        }
        if let Ok(max) = std::env::var("MUXRPC_MAX_CONNECTIONS") {
            if let Ok(parsed) = max.parse() {
                self.max_connections = parsed;
            }
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse {0}: {1}")]
    ParseError(PathBuf, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr, "127.0.0.1:9999".parse().unwrap());
        assert_eq!(
            config.network.http_addr,
            Some("127.0.0.1:9980".parse().unwrap())
        );
        assert_eq!(config.network.max_connections, 1000);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"0.0.0.0:7000\"\n  max_connections: 16"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr, "0.0.0.0:7000".parse().unwrap());
        assert_eq!(config.network.max_connections, 16);
        // Unspecified fields keep their defaults.
        assert!(config.network.http_addr.is_some());
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/muxrpc.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_, _)));
    }

    #[test]
    fn test_from_file_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network: [not, a, map]").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_, _)));
    }
}
