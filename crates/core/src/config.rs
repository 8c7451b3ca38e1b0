//! Configuration management
//!
//! This module handles loading and saving the client configuration file.
//! The configuration file is stored in TOML format at
//! ~/.config/disk-rest/config.toml. Credentials are never written here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://cloud-api.yandex.net";

/// Default User-Agent sent with every request
pub const DEFAULT_USER_AGENT: &str = "Cloud API Android Client/1.0";

/// Default transfer chunk: 64 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default cap on error and JSON bodies read into memory: 64 KiB
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Schema version for migration support
    pub schema_version: u32,

    /// API endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Follow HTTP redirects
    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,

    /// Transfer tuning
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub connect_ms: u64,

    /// Read timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub read_ms: u64,
}

/// Chunking and buffering limits used by the engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes read or written per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum bytes of an error or JSON body kept in memory
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30_000
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_body_limit() -> usize {
    DEFAULT_BODY_LIMIT
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_timeout(),
            read_ms: default_timeout(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl TransferConfig {
    /// Chunk size, never zero
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            follow_redirects: true,
            timeout: TimeoutConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".into()))?;
        let config_path = config_dir.join("disk-rest").join("config.toml");
        Ok(Self { config_path })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    pub fn load(&self) -> Result<ClientConfig> {
        if !self.config_path.exists() {
            return Ok(ClientConfig::default());
        }

        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| Error::local_io(&self.config_path, e))?;
        let mut config: ClientConfig = toml::from_str(&content)?;

        if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}",
                config.schema_version, SCHEMA_VERSION
            )));
        }
        config.schema_version = SCHEMA_VERSION;

        url::Url::parse(&config.base_url)?;
        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 600 (owner read/write only).
    pub fn save(&self, config: &ClientConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::local_io(parent, e))?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::local_io(&self.config_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)
                .map_err(|e| Error::local_io(&self.config_path, e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = ConfigManager::with_path(config_path);
        (manager, temp_dir)
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout.connect_ms, 30_000);
        assert_eq!(config.timeout.read_ms, 30_000);
        assert_eq!(config.transfer.chunk_size, 64 * 1024);
        assert!(config.follow_redirects);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let (manager, _temp_dir) = temp_config_manager();
        let config = manager.load().unwrap();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_save_and_load() {
        let (manager, _temp_dir) = temp_config_manager();

        let mut config = ClientConfig::default();
        config.base_url = "http://localhost:8080".to_string();
        config.transfer.chunk_size = 1024;

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(loaded.base_url, "http://localhost:8080");
        assert_eq!(loaded.transfer.chunk_size, 1024);
        assert_eq!(loaded.transfer.body_limit, DEFAULT_BODY_LIMIT);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let (manager, _temp_dir) = temp_config_manager();
        std::fs::write(
            manager.config_path(),
            "schema_version = 1\n[timeout]\nconnect_ms = 500\n",
        )
        .unwrap();

        let config = manager.load().unwrap();
        assert_eq!(config.timeout.connect_ms, 500);
        assert_eq!(config.timeout.read_ms, 30_000);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_schema_version_too_new() {
        let (manager, _temp_dir) = temp_config_manager();

        let content = format!("schema_version = {}\n", SCHEMA_VERSION + 1);
        std::fs::write(manager.config_path(), content).unwrap();

        let result = manager.load();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("newer than supported")
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let (manager, _temp_dir) = temp_config_manager();
        std::fs::write(
            manager.config_path(),
            "schema_version = 1\nbase_url = \"not a url\"\n",
        )
        .unwrap();

        assert!(matches!(manager.load(), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_chunk_size_never_zero() {
        let config = TransferConfig {
            chunk_size: 0,
            body_limit: 16,
        };
        assert_eq!(config.chunk_size(), 1);
    }
}
