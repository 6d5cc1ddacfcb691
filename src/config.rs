//! # Configuration Management
//!
//! Centralized configuration for links, providers and connection adapters.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Example
//! ```toml
//! [link]
//! max_frame_length = 1048576
//! write_timeout = 10000
//! duplicate_policy = "replace_existing"
//! read_buffer_capacity = 4096
//!
//! [tcp]
//! address = "0.0.0.0:1716"
//! shutdown_timeout = 10000
//!
//! [logging]
//! app_name = "package-link"
//! log_level = "info"
//! json_format = false
//! ```

use crate::core::codec::DEFAULT_MAX_FRAME_LENGTH;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default TCP port for device links
pub const DEFAULT_TCP_PORT: u16 = 1716;

/// Largest frame length accepted by validation (64 MiB)
pub const MAX_FRAME_LENGTH_LIMIT: usize = 64 * 1024 * 1024;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LinkConfig {
    /// Per-link behavior
    #[serde(default)]
    pub link: LinkSettings,

    /// TCP accept/dial adapter
    #[serde(default)]
    pub tcp: TcpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PACKAGE_LINK_TCP_ADDRESS") {
            config.tcp.address = addr;
        }

        if let Ok(len) = std::env::var("PACKAGE_LINK_MAX_FRAME_LENGTH") {
            if let Ok(val) = len.parse::<usize>() {
                config.link.max_frame_length = val;
            }
        }

        if let Ok(timeout) = std::env::var("PACKAGE_LINK_WRITE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.link.write_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(policy) = std::env::var("PACKAGE_LINK_DUPLICATE_POLICY") {
            config.link.duplicate_policy = match policy.as_str() {
                "replace_existing" => DuplicatePolicy::ReplaceExisting,
                "reject_new" => DuplicatePolicy::RejectNew,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Unknown duplicate policy: {other}"
                    )))
                }
            };
        }

        if let Ok(level) = std::env::var("PACKAGE_LINK_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.log_level = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.link.validate());
        errors.extend(self.tcp.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// What a provider does when a second connection arrives for an identity
/// that already has a live link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The newer connection wins; the older link is disconnected
    #[default]
    ReplaceExisting,
    /// The newer connection is refused with `DuplicateConnection`
    RejectNew,
}

/// Per-link behavior shared by every link a provider creates
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkSettings {
    /// Largest frame accepted from or written to a stream
    pub max_frame_length: usize,

    /// Upper bound on one frame write
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,

    /// Duplicate-connection resolution
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Initial capacity of the reader's accumulation buffer
    pub read_buffer_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            write_timeout: timeout::DEFAULT_WRITE_TIMEOUT,
            duplicate_policy: DuplicatePolicy::default(),
            read_buffer_capacity: 4096,
        }
    }
}

impl LinkSettings {
    /// Validate link settings
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_length < 1024 {
            errors.push("Max frame length too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_length > MAX_FRAME_LENGTH_LIMIT {
            errors.push(format!(
                "Max frame length too large: {} bytes (maximum: 64 MB)",
                self.max_frame_length
            ));
        }

        if self.write_timeout.as_millis() < 10 {
            errors.push("Write timeout too short (minimum: 10ms)".to_string());
        } else if self.write_timeout.as_secs() > 300 {
            errors.push("Write timeout too long (maximum: 300s)".to_string());
        }

        if self.read_buffer_capacity == 0 {
            errors.push("Read buffer capacity must be greater than 0".to_string());
        } else if self.read_buffer_capacity > self.max_frame_length {
            errors.push("Read buffer capacity cannot exceed max frame length".to_string());
        }

        errors
    }
}

/// TCP adapter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TcpConfig {
    /// Listen address (e.g., "0.0.0.0:1716")
    pub address: String,

    /// Timeout for links to close during shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_TCP_PORT}"),
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl TcpConfig {
    /// Validate TCP configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("TCP address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid TCP address format: '{}' (expected format: '0.0.0.0:1716')",
                self.address
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("package-link"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
