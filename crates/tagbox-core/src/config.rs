//! Configuration management for tagbox.
//!
//! Loads configuration from ${TAGBOX_HOME}/config.toml with sensible defaults.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for tagbox configuration and data files.
    //!
    //! TAGBOX_HOME resolution order:
    //! 1. TAGBOX_HOME environment variable (if set)
    //! 2. ~/.config/tagbox (default)
    //! 3. ./.tagbox when no home directory can be determined

    use std::path::PathBuf;

    /// Returns the tagbox home directory.
    pub fn tagbox_home() -> PathBuf {
        if let Ok(home) = std::env::var("TAGBOX_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".tagbox"),
            |h| h.join(".config").join("tagbox"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        tagbox_home().join("config.toml")
    }

    /// Returns the default path of the file-backed store.
    pub fn store_path() -> PathBuf {
        tagbox_home().join("store.json")
    }
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token for Telegram API.
    pub bot_token: Option<String>,
    /// Users allowed to save content from private chats.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist_user_ids: Vec<i64>,
    /// Channels whose posts are saved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist_chat_ids: Vec<i64>,
    /// Shared secret for webhook deliveries.
    pub webhook_secret: Option<String>,
}

/// Ingestion pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub album_ttl_secs: u64,
    pub album_settle_ms: u64,
    pub album_max_parts: usize,
    pub shutdown_grace_secs: u64,
    pub private_default_tag: String,
    pub channel_default_tag: String,
    pub album_default_tag: String,
}

impl IngestConfig {
    pub fn album_ttl(&self) -> Duration {
        Duration::from_secs(self.album_ttl_secs)
    }

    pub fn album_settle_delay(&self) -> Duration {
        Duration::from_millis(self.album_settle_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            album_ttl_secs: 60,
            album_settle_ms: 2000,
            album_max_parts: 10,
            shutdown_grace_secs: 5,
            private_default_tag: "inbox".to_string(),
            channel_default_tag: "channel".to_string(),
            album_default_tag: "media".to_string(),
        }
    }
}

/// Webhook HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub webhook_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            webhook_path: "/telegram/webhook".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

/// Key-value store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Store file location; defaults to `$TAGBOX_HOME/store.json`.
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn effective_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(paths::store_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `tagbox_bot=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.ingest.album_ttl_secs, 60);
        assert_eq!(config.ingest.album_max_parts, 10);
        assert_eq!(config.ingest.album_settle_delay(), Duration::from_secs(2));
        assert!(config.telegram.bot_token.is_none());
        assert_eq!(config.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(
            &config_path,
            "[telegram]\nallowlist_user_ids = [42]\n\n[ingest]\nalbum_settle_ms = 500\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.telegram.allowlist_user_ids, vec![42]);
        assert_eq!(config.ingest.album_settle_ms, 500);
        assert_eq!(config.ingest.album_ttl_secs, 60);
        assert_eq!(config.ingest.private_default_tag, "inbox");
        assert_eq!(config.server.webhook_path, "/telegram/webhook");
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        assert!(config_path.exists());
        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("album_ttl_secs = 60"));
        assert!(contents.contains("# bot_token ="));
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(&config_path, "").unwrap();

        let result = Config::init(&config_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = toml::from_str(default_config_template()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.ingest.album_ttl_secs, defaults.ingest.album_ttl_secs);
        assert_eq!(config.ingest.album_settle_ms, defaults.ingest.album_settle_ms);
        assert_eq!(config.server.bind, defaults.server.bind);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_storage_backend_and_log_format_parse_lowercase() {
        let config: Config =
            toml::from_str("[storage]\nbackend = \"memory\"\n\n[logging]\nformat = \"json\"\n")
                .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
