//! TOML configuration for the `duosida` CLI.
//!
//! The file is optional and only ever read. It supplies defaults that
//! command-line arguments and `DUOSIDA_*` environment variables override.
//! Default location:
//! - Windows:  `%APPDATA%\Duosida\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/duosida/config.toml` (or `~/.config/...`)
//! - macOS:    `~/Library/Application Support/Duosida/config.toml`
//!
//! ```toml
//! log_level = "info"
//!
//! [charger]
//! host = "192.168.20.95"
//! device_id = "0310107112122360374"
//!
//! [session]
//! response_timeout_secs = 5
//!
//! [monitor]
//! interval_secs = 2
//! ```
//!
//! Every field has a default, so a partial file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::application::monitor::MonitorOptions;
use crate::infrastructure::network::{
    discovery::{DiscoveryConfig, DISCOVERY_PORTS},
    session::{SessionConfig, DEFAULT_PORT},
};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub charger: ChargerConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// The charger the CLI talks to when no `--host` / `--device-id` is given.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChargerConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionSettings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    #[serde(default = "default_command_settle_ms")]
    pub command_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DiscoverySettings {
    #[serde(default = "default_discovery_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_discovery_ports")]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MonitorSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_response_timeout_secs() -> u64 {
    5
}
fn default_command_settle_ms() -> u64 {
    500
}
fn default_discovery_timeout_secs() -> u64 {
    5
}
fn default_discovery_ports() -> Vec<u16> {
    DISCOVERY_PORTS.to_vec()
}
fn default_interval_secs() -> u64 {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            charger: ChargerConfig::default(),
            session: SessionSettings::default(),
            discovery: DiscoverySettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            host: None,
            device_id: None,
            port: default_port(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            response_timeout_secs: default_response_timeout_secs(),
            command_settle_ms: default_command_settle_ms(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_discovery_timeout_secs(),
            ports: default_discovery_ports(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

// ── Conversions into runtime configs ──────────────────────────────────────────

impl AppConfig {
    /// Session timings from `[session]`, with `port` overriding
    /// `[charger] port` when given.
    pub fn session_config(&self, port: Option<u16>) -> SessionConfig {
        SessionConfig {
            port: port.unwrap_or(self.charger.port),
            connect_timeout: Duration::from_secs(self.session.connect_timeout_secs),
            response_timeout: Duration::from_secs(self.session.response_timeout_secs),
            command_settle: Duration::from_millis(self.session.command_settle_ms),
            ..SessionConfig::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            ports: self.discovery.ports.clone(),
            ..DiscoveryConfig::default()
        }
    }

    /// Rejects values that would make the runtime configs unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.interval_secs",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions::every(Duration::from_secs(self.monitor.interval_secs))
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from the default location when `None`.
///
/// A missing file at the default location yields [`AppConfig::default`]; a
/// missing file at an explicit path is an error.
///
/// # Errors
///
/// [`ConfigError::Io`] for file-system errors, [`ConfigError::Parse`] if the
/// TOML is malformed, [`ConfigError::Invalid`] for an out-of-range value.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => read_config(path),
        None => {
            // No platform dir (e.g. HOME unset) just means no config file.
            let Ok(path) = config_file_path() else {
                return Ok(AppConfig::default());
            };
            match read_config(&path) {
                Err(ConfigError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    Ok(AppConfig::default())
                }
                other => other,
            }
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Resolves the platform config base directory including the `duosida`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Duosida"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Duosida")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("duosida"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
