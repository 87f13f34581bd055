// ABOUTME: Configuration loading for tether registries and transports
// ABOUTME: TOML config file under the XDG config directory, with sensible defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Registry behavior
    pub registry: RegistryConfig,
    /// Settings applied to every underlying channel
    pub transport: TransportConfig,
}

/// How `watch_connectivity_state` waits on a shared channel.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Wait while holding the entry lock. Watchers and every other
    /// operation on the same entry run one at a time.
    #[default]
    Serialized,
    /// Capture the channel under the lock and wait outside it.
    Concurrent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub watch_mode: WatchMode,
}

/// Keep-alive behavior for idle HTTP/2 connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Interval between keep-alive pings when the connection is idle
    pub interval_secs: u64,
    /// Timeout waiting for a keep-alive response before the connection is dead
    pub timeout_secs: u64,
    /// Send keep-alive pings even when no streams are active
    pub while_idle: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 20,
            while_idle: true,
        }
    }
}

impl KeepAliveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection timeout in seconds. None leaves the transport default.
    pub connect_timeout_secs: Option<u64>,
    /// Keep-alive settings. None disables keep-alive.
    pub keep_alive: Option<KeepAliveConfig>,
    /// Use TLS for targets without a scheme even when no credentials are given
    pub default_tls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(30),
            keep_alive: Some(KeepAliveConfig::default()),
            default_tls: false,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Get the XDG config directory for tether (~/.config/tether)
    pub fn config_dir() -> PathBuf {
        // Respect XDG_CONFIG_HOME if set, otherwise use ~/.config
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|p| p.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("tether")
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load config from XDG config directory
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    /// Generate a default config file content
    pub fn default_toml() -> String {
        r#"# tether configuration
# Location: ~/.config/tether/config.toml

[registry]
# "serialized" waits for state changes under the channel lock,
# "concurrent" lets several handles watch one shared channel at once.
watch_mode = "serialized"

[transport]
connect_timeout_secs = 30
default_tls = false

[transport.keep_alive]
interval_secs = 10
timeout_secs = 20
while_idle = true
"#
        .to_string()
    }

    /// Initialize config directory and create default config if needed
    pub fn init() -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_path();

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

        if !config_path.exists() {
            std::fs::write(&config_path, Self::default_toml())
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_toml_matches_defaults() {
        let parsed: Config = toml::from_str(&Config::default_toml()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [registry]
            watch_mode = "concurrent"
            "#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.registry.watch_mode, WatchMode::Concurrent);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_keep_alive_can_be_omitted() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [transport]
            connect_timeout_secs = 5
            default_tls = true
            "#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.transport.connect_timeout(), Some(Duration::from_secs(5)));
        assert!(config.transport.default_tls);
        // Missing table keeps the default keep-alive.
        assert!(config.transport.keep_alive.is_some());
    }

    #[test]
    fn test_invalid_watch_mode_fails() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\nwatch_mode = \"sometimes\"").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_missing_file_fails_with_context() {
        let err = Config::load_from("/nonexistent/tether.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_keep_alive_durations() {
        let ka = KeepAliveConfig::default();
        assert_eq!(ka.interval(), Duration::from_secs(10));
        assert_eq!(ka.timeout(), Duration::from_secs(20));
        assert!(ka.while_idle);
    }
}
