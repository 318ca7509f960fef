//! # Configuration Management
//!
//! Centralized configuration for the client.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! The RSA modulus/exponent constants live here because they are the
//! only state shared across sessions; everything else is owned by one
//! session at a time.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Maximum body length accepted in a single frame (256 KB). Game
/// frames are small; anything larger is a framing error or an attack.
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Empty-read strikes allowed before a partial read is declared dead.
pub const READ_ATTEMPTS: u32 = 3;

/// Default RSA public exponent used by the modeled protocol.
pub const DEFAULT_RSA_EXPONENT: u32 = 65537;

/// Main configuration structure containing all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Client connection configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("EVAWIRE_HOST") {
            config.client.host = host;
        }
        if let Ok(port) = std::env::var("EVAWIRE_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.client.port = val;
            }
        }
        if let Ok(deadline) = std::env::var("EVAWIRE_HANDSHAKE_DEADLINE_MS") {
            if let Ok(val) = deadline.parse::<u64>() {
                config.client.handshake_deadline = Duration::from_millis(val);
            }
        }
        if let Ok(proxy) = std::env::var("EVAWIRE_SOCKS5") {
            config.transport.socks5 = Some(Socks5Config {
                address: proxy,
                username: None,
                password: None,
            });
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration.
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate the configuration for common misconfigurations.
    /// Returns a list of issues; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors
    }

    /// Validate and return Result - convenience method.
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

/// Reconnect policy for the initial connect loop. Mid-session frame
/// I/O never retries; this only governs attempts to establish a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "attempts")]
pub enum ReconnectPolicy {
    /// Retry until a socket-level connection succeeds.
    Unbounded,
    /// Give up after this many failed attempts.
    Limited(u32),
}

/// Client connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Game server host name.
    pub host: String,

    /// Game server port.
    pub port: u16,

    /// Deadline applied to each awaited handshake step.
    #[serde(with = "duration_serde")]
    pub handshake_deadline: Duration,

    /// Pause between failed connection attempts.
    #[serde(with = "duration_serde")]
    pub reconnect_delay: Duration,

    /// Connect retry policy.
    pub reconnect: ReconnectPolicy,

    /// Product version reported during the identification burst.
    pub product_version: String,

    /// RSA public exponent of the server key.
    pub rsa_exponent: u32,

    /// RSA modulus of the server key, unsigned hex.
    pub rsa_modulus: String,

    /// Optional path to the message header table JSON.
    pub header_file: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 30001,
            handshake_deadline: timeout::DEFAULT_TIMEOUT,
            reconnect_delay: Duration::from_secs(1),
            reconnect: ReconnectPolicy::Unbounded,
            product_version: String::from("AIR63,0,0,0"),
            rsa_exponent: DEFAULT_RSA_EXPONENT,
            rsa_modulus: String::new(),
            header_file: None,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Client host cannot be empty".to_string());
        }
        if self.port == 0 {
            errors.push("Client port cannot be 0".to_string());
        }
        if self.handshake_deadline.as_millis() < 100 {
            errors.push("Handshake deadline too short (minimum: 100ms)".to_string());
        }
        if self.rsa_modulus.is_empty() {
            errors.push("RSA modulus must be supplied".to_string());
        } else if self.rsa_modulus.chars().any(|c| !c.is_ascii_hexdigit()) {
            errors.push("RSA modulus is not valid hex".to_string());
        }
        if let ReconnectPolicy::Limited(0) = self.reconnect {
            errors.push("Limited reconnect policy needs at least 1 attempt".to_string());
        }

        errors
    }
}

/// SOCKS5 proxy settings. Username and password are only used when the
/// proxy selects the username/password method.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Socks5Config {
    /// Proxy address, `host:port`.
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Optional SOCKS5 proxy in front of the game connection.
    pub socks5: Option<Socks5Config>,

    /// Maximum accepted frame body size in bytes.
    pub max_frame_size: usize,

    /// Empty-read strikes before a partial read fails.
    pub read_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socks5: None,
            max_frame_size: MAX_FRAME_SIZE,
            read_attempts: READ_ATTEMPTS,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size < 6 {
            errors.push("Max frame size too small to hold any frame".to_string());
        }
        if self.read_attempts == 0 {
            errors.push("Read attempts must be greater than 0".to_string());
        }
        if let Some(proxy) = &self.socks5 {
            if proxy.address.is_empty() {
                errors.push("SOCKS5 proxy address cannot be empty".to_string());
            }
            if proxy.username.is_some() != proxy.password.is_some() {
                errors.push("SOCKS5 username and password must be set together".to_string());
            }
        }

        errors
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether to include event targets in log lines
    pub log_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_format: false,
            log_targets: false,
        }
    }
}

/// Helper module for Duration serialization/deserialization as millis.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization.
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.to_string().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fail_only_on_missing_modulus() {
        let config = NetworkConfig::default();
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("RSA modulus"));
    }

    #[test]
    fn toml_roundtrip() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.client.host = "game.example.com".into();
            c.client.rsa_modulus = "bd214e4f".into();
            c.client.reconnect = ReconnectPolicy::Limited(5);
        });
        let rendered = toml::to_string(&config).unwrap();
        let parsed = NetworkConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.client.host, "game.example.com");
        assert_eq!(parsed.client.reconnect, ReconnectPolicy::Limited(5));
        assert!(parsed.validate().is_empty());
    }

    #[test]
    fn handshake_deadline_parses_as_millis() {
        let config = NetworkConfig::from_toml(
            r#"
            [client]
            host = "h"
            port = 30001
            handshake_deadline = 5000
            reconnect_delay = 250
            reconnect = { policy = "unbounded" }
            product_version = "v"
            rsa_exponent = 65537
            rsa_modulus = "ff"
            "#,
        )
        .unwrap();
        assert_eq!(config.client.handshake_deadline, Duration::from_secs(5));
    }

    #[test]
    fn mismatched_proxy_credentials_flagged() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.client.rsa_modulus = "ff".into();
            c.transport.socks5 = Some(Socks5Config {
                address: "127.0.0.1:1080".into(),
                username: Some("u".into()),
                password: None,
            });
        });
        assert!(config
            .validate()
            .iter()
            .any(|e| e.contains("username and password")));
    }

    #[test]
    fn zero_attempt_reconnect_flagged() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.client.rsa_modulus = "ff".into();
            c.client.reconnect = ReconnectPolicy::Limited(0);
        });
        assert!(!config.validate().is_empty());
    }
}
