// Configuration management for the Nearcast CLI
//
// Stored as JSON in the platform config directory:
// - Linux: ~/.config/nearcast/config.json
// - macOS: ~/Library/Application Support/nearcast/config.json

use anyhow::{Context, Result};
use nearcast_core::NearcastConfig;
use std::path::{Path, PathBuf};

pub struct Config {
    pub core: NearcastConfig,
    path: PathBuf,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("nearcast");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the default config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from `path` (or the default location), creating it if missing
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_file()?,
        };

        let core = if path.exists() {
            NearcastConfig::from_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        } else {
            let core = NearcastConfig::default();
            core.save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            core
        };

        Ok(Self { core, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        self.core
            .save(&self.path)
            .context("Failed to write config file")
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "app_name" => {
                self.core.app_name = value.to_string();
            }
            "notify_listener_if_closed" => {
                self.core.channel.notify_listener_if_closed =
                    value.parse().context("Invalid boolean value")?;
            }
            "max_session_id_attempts" => {
                self.core.presence.max_session_id_attempts =
                    value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.core.validate()?;
        self.save()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "app_name" => Some(self.core.app_name.clone()),
            "notify_listener_if_closed" => {
                Some(self.core.channel.notify_listener_if_closed.to_string())
            }
            "max_session_id_attempts" => {
                Some(self.core.presence.max_session_id_attempts.to_string())
            }
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        ["app_name", "notify_listener_if_closed", "max_session_id_attempts"]
            .iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect()
    }
}
