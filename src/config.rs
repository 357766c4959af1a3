use crate::rpc::{BusKind, CallTimeout};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use zbus::names::{BusName, InterfaceName, MemberName, WellKnownName};
use zbus::zvariant::ObjectPath;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config directory")]
    NoConfigDir,

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,

    /// Well-known name this client holds while a call is in flight
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Where calls are addressed
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub call: CallConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BusConfig {
    #[serde(default)]
    pub kind: BusKind,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdentityConfig {
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Pause between name requests while queued
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Queued answers tolerated before giving up (0 = retry forever)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_destination")]
    pub destination: String,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_interface")]
    pub interface: String,

    #[serde(default = "default_method")]
    pub method: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CallConfig {
    /// Reply timeout: -1 for the bus default, 2147483647 for none
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Stop at the first failed cycle instead of moving on to the next line
    #[serde(default)]
    pub fail_fast: bool,

    /// Shown before each line when stdin is a terminal
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_client_name() -> String {
    "org.addbus.AddClient".to_string()
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    60
}

fn default_destination() -> String {
    crate::dbus::SERVICE_NAME.to_string()
}

fn default_path() -> String {
    crate::dbus::OBJECT_PATH.to_string()
}

fn default_interface() -> String {
    crate::dbus::INTERFACE_NAME.to_string()
}

fn default_method() -> String {
    crate::dbus::METHOD_NAME.to_string()
}

fn default_timeout_ms() -> i32 {
    crate::rpc::call::TIMEOUT_USE_DEFAULT
}

fn default_prompt() -> String {
    "Please type two numbers: ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            backoff_ms: default_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            path: default_path(),
            interface: default_interface(),
            method: default_method(),
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            prompt: default_prompt(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl IdentityConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// `None` when retries are unbounded.
    pub fn max_attempts(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }
}

impl CallConfig {
    pub fn timeout(&self) -> Result<CallTimeout, ConfigError> {
        CallTimeout::from_millis(self.timeout_ms).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "timeout_ms must be -1 or non-negative, got {}",
                self.timeout_ms
            ))
        })
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("org", "addbus", "addbus")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from the default location, or create it if missing
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from `path`, writing defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        WellKnownName::try_from(self.identity.name.as_str()).map_err(|e| {
            ConfigError::ValidationError(format!(
                "identity name '{}' is not a well-known bus name: {}",
                self.identity.name, e
            ))
        })?;

        if self.identity.backoff_ms == 0 {
            return Err(ConfigError::ValidationError(
                "backoff_ms must be positive".into(),
            ));
        }

        BusName::try_from(self.service.destination.as_str()).map_err(|e| {
            ConfigError::ValidationError(format!("invalid service destination: {}", e))
        })?;
        ObjectPath::try_from(self.service.path.as_str()).map_err(|e| {
            ConfigError::ValidationError(format!("invalid service path: {}", e))
        })?;
        InterfaceName::try_from(self.service.interface.as_str()).map_err(|e| {
            ConfigError::ValidationError(format!("invalid service interface: {}", e))
        })?;
        MemberName::try_from(self.service.method.as_str()).map_err(|e| {
            ConfigError::ValidationError(format!("invalid service method: {}", e))
        })?;

        self.call.timeout()?;

        Ok(())
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create config directory if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        info!("Config saved to: {}", path.display());
        Ok(())
    }
}

/// Show current configuration
pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };
    let config = Config::load_from(&path)?;

    println!("Config file: {}\n", path.display());
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
