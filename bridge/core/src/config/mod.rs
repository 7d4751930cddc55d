//! TOML Configuration File Support
//!
//! Centralized configuration loading for the bridge, supporting a TOML file at
//! `~/.config/emitter-bridge/bridge.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/emitter-bridge/bridge.toml`
//!   (typically `~/.config/emitter-bridge/bridge.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [heartbeat]
//! enabled = true
//! interval_ms = 1000
//! max_unanswered_pings = 5
//!
//! [client]
//! host = "127.0.0.1"
//! port = 8080
//! secure = false
//! username = "bridge"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::ConnectOptions;
use crate::proxy::HeartbeatConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while loading or validating bridge configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Heartbeat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatToml {
    /// Whether to ping the relay at all
    pub enabled: Option<bool>,

    /// Ping interval in milliseconds
    pub interval_ms: Option<u64>,

    /// Unanswered pings tolerated before the relay is declared dead
    pub max_unanswered_pings: Option<u32>,
}

/// Network client section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Network host
    pub host: Option<String>,

    /// Network port
    pub port: Option<u16>,

    /// Whether to use a secure transport
    pub secure: Option<bool>,

    /// Username announced to presence watchers
    pub username: Option<String>,
}

/// Raw contents of `bridge.toml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeToml {
    /// Heartbeat configuration section
    pub heartbeat: HeartbeatToml,

    /// Network client configuration section
    pub client: ClientToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the bridge
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Proxy heartbeat
    pub heartbeat: HeartbeatConfig,

    /// Where the relay connects
    pub client: ConnectOptions,

    /// File the values were read from, if one existed
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            client: ConnectOptions::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Record where the winning values came from
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Reject values the proxy cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a zero heartbeat interval
    /// or a zero unanswered-ping threshold while the heartbeat is enabled, or
    /// for an empty host.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.enabled {
            if self.heartbeat.interval.is_zero() {
                return Err(ConfigError::ValidationError(
                    "heartbeat interval must be greater than zero".to_string(),
                ));
            }
            if self.heartbeat.max_unanswered_pings == 0 {
                return Err(ConfigError::ValidationError(
                    "max_unanswered_pings must be greater than zero".to_string(),
                ));
            }
        }
        if self.client.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "client host must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/emitter-bridge/bridge.toml` or
/// `~/.config/emitter-bridge/bridge.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("emitter-bridge").join("bridge.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<BridgeConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the merged values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<BridgeConfig, ConfigError> {
    load_with_env(path, |name| std::env::var(name).ok())
}

fn load_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<BridgeConfig, ConfigError> {
    let mut config = BridgeConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: BridgeToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Copy every value present in the parsed file onto `config`
fn apply_toml_config(config: &mut BridgeConfig, toml: &BridgeToml) {
    if let Some(enabled) = toml.heartbeat.enabled {
        config.heartbeat.enabled = enabled;
    }
    if let Some(interval) = toml.heartbeat.interval_ms {
        config.heartbeat.interval = Duration::from_millis(interval);
    }
    if let Some(max) = toml.heartbeat.max_unanswered_pings {
        config.heartbeat.max_unanswered_pings = max;
    }

    if let Some(ref host) = toml.client.host {
        config.client.host = host.clone();
    }
    if let Some(port) = toml.client.port {
        config.client.port = port;
    }
    if let Some(secure) = toml.client.secure {
        config.client.secure = secure;
    }
    if toml.client.username.is_some() {
        config.client.username = toml.client.username.clone();
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    let parsed = value.parse().ok();
    if parsed.is_none() {
        tracing::warn!(variable = name, value, "Ignoring unparsable environment value");
    }
    parsed
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Overlay `EMITTER_BRIDGE_*` variables; unparsable values are logged and skipped
fn apply_env_config(config: &mut BridgeConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(host) = env("EMITTER_BRIDGE_HOST") {
        config.client.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("EMITTER_BRIDGE_PORT") {
        if let Some(port) = parse_env::<u16>("EMITTER_BRIDGE_PORT", &port) {
            config.client.port = port;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(secure) = env("EMITTER_BRIDGE_SECURE") {
        config.client.secure = parse_flag(&secure);
        config.source = ConfigSource::Env;
    }
    if let Some(username) = env("EMITTER_BRIDGE_USERNAME") {
        config.client.username = Some(username);
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = env("EMITTER_BRIDGE_HEARTBEAT") {
        config.heartbeat.enabled = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
    if let Some(interval) = env("EMITTER_BRIDGE_HEARTBEAT_INTERVAL_MS") {
        if let Some(ms) = parse_env::<u64>("EMITTER_BRIDGE_HEARTBEAT_INTERVAL_MS", &interval) {
            config.heartbeat.interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(max) = env("EMITTER_BRIDGE_MAX_UNANSWERED") {
        if let Some(n) = parse_env::<u32>("EMITTER_BRIDGE_MAX_UNANSWERED", &max) {
            config.heartbeat.max_unanswered_pings = n;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line values that win over every other source
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Host override
    pub host: Option<String>,

    /// Port override
    pub port: Option<u16>,

    /// Secure transport override
    pub secure: Option<bool>,

    /// Username override
    pub username: Option<String>,

    /// Heartbeat enabled override
    pub heartbeat_enabled: Option<bool>,
}

impl ConfigOverrides {
    /// No overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set host override
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set secure transport override
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Set username override
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set heartbeat enabled override
    #[must_use]
    pub fn with_heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = Some(enabled);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut BridgeConfig) {
        if self.host.is_some()
            || self.port.is_some()
            || self.secure.is_some()
            || self.username.is_some()
            || self.heartbeat_enabled.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.host {
            config.client.host = host.clone();
        }
        if let Some(port) = self.port {
            config.client.port = port;
        }
        if let Some(secure) = self.secure {
            config.client.secure = secure;
        }
        if let Some(ref username) = self.username {
            config.client.username = Some(username.clone());
        }
        if let Some(enabled) = self.heartbeat_enabled {
            config.heartbeat.enabled = enabled;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
