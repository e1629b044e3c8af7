//! Gateway configuration
//!
//! Loaded from a TOML file, then overridden from the environment. Credentials
//! are never stored in the file: it names the environment variables holding
//! them and they are resolved at connect time.

use crate::protocol::{validate_gateway_id, validate_topic_level};
use crate::transport::DeliveryGuarantee;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `mqtt.broker_url`
pub const BROKER_URL_ENV: &str = "BROKER_URL";

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub gateway: GatewaySection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub rpc: RpcSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Gateway identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySection {
    /// Gateway identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// First topic level of every request and reply topic
    pub domain: String,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Client id prefix; defaults to the gateway id
    #[serde(default)]
    pub client_id_prefix: Option<String>,
    /// Delivery guarantee for request publishes
    #[serde(default)]
    pub qos: DeliveryGuarantee,
    /// Keep alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive() -> u64 {
    60
}

/// Request/response call settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcSection {
    /// Timeout applied when a caller does not pass one
    #[serde(default = "default_call_timeout_ms")]
    pub default_timeout_ms: u64,
    /// How long to wait for the broker to acknowledge a subscription
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    5000
}

fn default_subscribe_timeout_ms() -> u64 {
    5000
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_call_timeout_ms(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
        }
    }
}

impl RpcSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }
}

/// Health endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_port() -> u16 {
    8080
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            port: default_health_port(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid gateway ID format: {0}")]
    InvalidGatewayId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayConfig {
    /// Load configuration from TOML file, apply environment overrides, validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, apply environment overrides, validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = toml::from_str(content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(broker_url) = lookup(BROKER_URL_ENV).filter(|url| !url.is_empty()) {
            self.mqtt.broker_url = broker_url;
        }
    }

    /// Validate field formats and ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_gateway_id(&self.gateway.id)
            .map_err(|e| ConfigError::InvalidGatewayId(format!("'{}': {e}", self.gateway.id)))?;

        for level in self.gateway.domain.split('/') {
            validate_topic_level(level).map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "gateway.domain '{}' is not a valid topic prefix: {e}",
                    self.gateway.domain
                ))
            })?;
        }

        if self.mqtt.broker_url.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.broker_url must not be empty".to_string(),
            ));
        }

        if self.rpc.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "rpc.default_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.rpc.subscribe_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "rpc.subscribe_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Client id prefix used for broker sessions
    pub fn client_id_prefix(&self) -> &str {
        self.mqtt
            .client_id_prefix
            .as_deref()
            .unwrap_or(&self.gateway.id)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[gateway]
id = "test-gateway"
domain = "dentistimo"

[mqtt]
broker_url = "mqtt://localhost:1883"

[rpc]
default_timeout_ms = 2000
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
