//! Runtime configuration for the core library.
//!
//! Loaded by the host process (the CLI reads it from `config.json`) and handed
//! to the components at construction time. Every section has defaults so a
//! partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearcastConfig {
    /// Application directory name used under XDG base directories
    pub app_name: String,
    pub channel: ChannelConfig,
    pub presence: PresenceConfig,
}

/// Byte channel behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Fire a disconnect listener immediately when it is registered on an
    /// already-closed channel. When false the listener is dropped unfired.
    pub notify_listener_if_closed: bool,
}

/// Session controller behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Upper bound on broadcast session id draws before giving up
    pub max_session_id_attempts: u32,
}

impl Default for NearcastConfig {
    fn default() -> Self {
        Self {
            app_name: "Nearcast".to_string(),
            channel: ChannelConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            notify_listener_if_closed: true,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            max_session_id_attempts: 16,
        }
    }
}

impl NearcastConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name cannot be empty".to_string()));
        }
        if self.presence.max_session_id_attempts == 0 {
            return Err(ConfigError::Invalid(
                "presence.max_session_id_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Read and validate a JSON config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: NearcastConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
