//! Configuration Module
//!
//! Handles application configuration loading, validation, and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application home: `~/.wa-dispatcher`
pub fn dispatcher_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wa-dispatcher")
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Dispatch scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Contact handling configuration
    #[serde(default)]
    pub contacts: ContactsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: "127.0.0.1")
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port (default: 3001)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory for uploaded media
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Maximum accepted upload size in bytes (default: 10 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_uploads_dir() -> PathBuf {
    dispatcher_home().join("uploads")
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            uploads_dir: default_uploads_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session credentials directory owned by the provider
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Delay before reconnecting after a disconnect, in seconds
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Delay before resetting after an authentication failure, in seconds
    #[serde(default = "default_auth_failure_delay_secs")]
    pub auth_failure_delay_secs: u64,

    /// Pause after tearing the handle down so the browser releases file locks
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,

    /// Store cleanup attempts on "resource busy"
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_attempts: u32,

    /// Fixed delay between store cleanup attempts, in milliseconds
    #[serde(default = "default_cleanup_delay_ms")]
    pub cleanup_delay_ms: u64,

    /// Consecutive automatic resets before waiting for the operator
    #[serde(default = "default_max_auto_resets")]
    pub max_auto_resets: u32,

    /// Render pairing codes as QR blocks in the log output
    #[serde(default = "default_true")]
    pub print_qr: bool,
}

fn default_store_dir() -> PathBuf {
    dispatcher_home().join("session")
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_auth_failure_delay_secs() -> u64 {
    5
}

fn default_teardown_grace_ms() -> u64 {
    2000
}

fn default_cleanup_attempts() -> u32 {
    3
}

fn default_cleanup_delay_ms() -> u64 {
    1000
}

fn default_max_auto_resets() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            auth_failure_delay_secs: default_auth_failure_delay_secs(),
            teardown_grace_ms: default_teardown_grace_ms(),
            cleanup_attempts: default_cleanup_attempts(),
            cleanup_delay_ms: default_cleanup_delay_ms(),
            max_auto_resets: default_max_auto_resets(),
            print_qr: true,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn auth_failure_delay(&self) -> Duration {
        Duration::from_secs(self.auth_failure_delay_secs)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }
}

/// Dispatch scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick period, in milliseconds (default: 1000)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Finished jobs kept for history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_history_limit() -> usize {
    500
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Contact handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactsConfig {
    /// JSON file holding contact segment tags
    #[serde(default = "default_segments_path")]
    pub segments_path: PathBuf,
}

fn default_segments_path() -> PathBuf {
    dispatcher_home().join("contact_segments.json")
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            segments_path: default_segments_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for debug log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Priority (lowest to highest):
    /// 1. Default values
    /// 2. System config: ~/.config/wa-dispatcher/config.toml
    /// 3. Local config: ./wa-dispatcher.toml
    /// 4. Environment variables
    pub fn load() -> Result<Self> {
        tracing::debug!("Loading configuration...");

        let mut config = Self::default();

        if let Some(system_config_path) = Self::system_config_path()
            && system_config_path.exists()
        {
            tracing::debug!("Loading system config from: {:?}", system_config_path);
            config = Self::from_file(&system_config_path)?;
        }

        let local_config_path = Self::local_config_path();
        if local_config_path.exists() {
            tracing::debug!("Loading local config from: {:?}", local_config_path);
            config = Self::from_file(&local_config_path)?;
        }

        config.apply_env_overrides();

        tracing::debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading configuration from custom path: {:?}", path);

        if !path.exists() {
            anyhow::bail!("Config file not found: {:?}", path);
        }
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();

        Ok(config)
    }

    /// Get the system config path: ~/.config/wa-dispatcher/config.toml
    pub fn system_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wa-dispatcher").join("config.toml"))
    }

    /// Get the local config path: ./wa-dispatcher.toml
    fn local_config_path() -> PathBuf {
        PathBuf::from("./wa-dispatcher.toml")
    }

    /// Load a TOML file. A later file replaces an earlier one wholesale; missing
    /// keys fall back to defaults.
    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `WA_DISPATCHER_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("WA_DISPATCHER_BIND") {
            self.server.bind = bind;
        }

        // PORT is honoured for compatibility with process managers
        if let Some(port) = lookup("WA_DISPATCHER_PORT").or_else(|| lookup("PORT")) {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid port override: {}", port),
            }
        }

        if let Some(dir) = lookup("WA_DISPATCHER_SESSION_DIR") {
            self.session.store_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup("WA_DISPATCHER_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(dir) = lookup("WA_DISPATCHER_UPLOADS_DIR") {
            self.server.uploads_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        tracing::debug!("Validating configuration...");

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        if self.scheduler.tick_ms == 0 {
            anyhow::bail!("scheduler.tick_ms must be greater than zero");
        }

        if self.session.cleanup_attempts == 0 {
            anyhow::bail!("session.cleanup_attempts must be at least 1");
        }

        if self.session.store_dir.as_os_str().is_empty() {
            anyhow::bail!("session.store_dir is empty");
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Configuration saved to: {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.session.cleanup_attempts, 3);
        assert_eq!(config.session.teardown_grace(), Duration::from_secs(2));
        assert_eq!(config.scheduler.tick(), Duration::from_secs(1));
        assert!(config.session.print_qr);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_tick() {
        let mut config = Config::default();
        config.scheduler.tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_toml_partial() {
        let toml_content = r#"
[server]
port = 8080

[session]
store_dir = "/var/lib/wa/session"
cleanup_attempts = 5
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.session.store_dir, PathBuf::from("/var/lib/wa/session"));
        assert_eq!(config.session.cleanup_attempts, 5);
        assert_eq!(config.session.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.scheduler.history_limit, 500);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.server.port = 4000;
        config.save(temp_file.path()).unwrap();

        let contents = std::fs::read_to_string(temp_file.path()).unwrap();
        let loaded: Config = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.server.port, 4000);
        assert_eq!(loaded.session.store_dir, config.session.store_dir);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("WA_DISPATCHER_BIND", "0.0.0.0"),
            ("PORT", "9000"),
            ("WA_DISPATCHER_SESSION_DIR", "/tmp/wa-session"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.session.store_dir, PathBuf::from("/tmp/wa-session"));
    }

    #[test]
    fn test_invalid_port_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "WA_DISPATCHER_PORT").then(|| "nope".to_string()));
        assert_eq!(config.server.port, 3001);
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        assert!(Config::load_from_path("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_system_config_path() {
        if let Some(path) = Config::system_config_path() {
            assert!(path.to_string_lossy().contains("wa-dispatcher"));
            assert!(path.to_string_lossy().ends_with("config.toml"));
        }
    }
}
