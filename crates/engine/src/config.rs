//! Configuration for the server and client engines.
//!
//! This module provides TOML-based configuration loading and saving. Both
//! configs carry the file-transfer port explicitly; by convention it is the
//! control port plus one, which is what the defaults encode.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;

/// Conventional control-channel listening port.
pub const DEFAULT_CONTROL_PORT: u16 = 400;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("backlog must be between 1 and 1024, got {0}")]
    InvalidBacklog(u32),

    #[error("buffer_size must be between 256 and 1048576 bytes, got {0}")]
    InvalidBufferSize(usize),

    #[error("server_ip must not be empty")]
    MissingServerIp,
}

/// Configuration for the listening (server) engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Control-channel listening port. Zero asks the OS for an ephemeral
    /// port.
    pub listen_port: u16,

    /// Listen backlog for the control socket.
    pub backlog: u32,

    /// Bytes per receive; every read allocates its own buffer of this size.
    pub buffer_size: usize,

    /// File-transfer listening port (conventionally `listen_port + 1`).
    pub transfer_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_CONTROL_PORT,
            backlog: 100,
            buffer_size: 8192,
            transfer_port: DEFAULT_CONTROL_PORT + protocol::TRANSFER_PORT_OFFSET,
        }
    }
}

impl ServerConfig {
    /// Loads a server configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves this configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Validates field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 || self.backlog > 1024 {
            return Err(ConfigError::InvalidBacklog(self.backlog));
        }
        if self.buffer_size < 256 || self.buffer_size > 1024 * 1024 {
            return Err(ConfigError::InvalidBufferSize(self.buffer_size));
        }
        Ok(())
    }
}

/// Configuration for the initiating (client) engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of the server.
    pub server_ip: String,

    /// Server control-channel port.
    pub server_port: u16,

    /// Server file-transfer port (conventionally `server_port + 1`).
    pub transfer_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            server_port: DEFAULT_CONTROL_PORT,
            transfer_port: DEFAULT_CONTROL_PORT + protocol::TRANSFER_PORT_OFFSET,
        }
    }
}

impl ClientConfig {
    /// Loads a client configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves this configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Validates field values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_ip.trim().is_empty() {
            return Err(ConfigError::MissingServerIp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_server_defaults_follow_port_convention() {
        let config = ServerConfig::default();
        assert_eq!(config.transfer_port, config.listen_port + 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_defaults_follow_port_convention() {
        let config = ClientConfig::default();
        assert_eq!(config.transfer_port, config.server_port + 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_config_toml_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");

        let config = ServerConfig {
            listen_port: 4400,
            backlog: 64,
            buffer_size: 4096,
            transfer_port: 4401,
        };
        config.save(&path).unwrap();

        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_client_config_toml_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.toml");

        let config = ClientConfig {
            server_ip: "10.0.0.7".to_string(),
            server_port: 4400,
            transfer_port: 4401,
        };
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ServerConfig = toml::from_str("listen_port = 5500").unwrap();
        assert_eq!(config.listen_port, 5500);
        assert_eq!(config.backlog, ServerConfig::default().backlog);
    }

    #[test]
    fn test_validate_rejects_zero_backlog() {
        let config = ServerConfig {
            backlog: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidBacklog(0)));
    }

    #[test]
    fn test_validate_rejects_tiny_buffer() {
        let config = ServerConfig {
            buffer_size: 64,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidBufferSize(64)));
    }

    #[test]
    fn test_validate_rejects_empty_server_ip() {
        let config = ClientConfig {
            server_ip: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingServerIp));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "backlog = 0").unwrap();
        assert!(ServerConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = ServerConfig::load(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
