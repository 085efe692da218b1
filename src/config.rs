//! TOML configuration for the MQTT agent
//!
//! Every `[agent]` field has a default, so a file only needs an `[mqtt]`
//! section naming the broker. Credentials are never stored in the file; the
//! config names the environment variables that hold them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    pub mqtt: MqttSection,
}

/// Capacities and timing of the agent loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Number of connection slots
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outstanding QoS>0 publishes tracked per connection
    #[serde(default = "default_pending_acks_max")]
    pub pending_acks_max: usize,
    /// Active subscriptions per connection
    #[serde(default = "default_subscriptions_max")]
    pub subscriptions_max: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long the loop waits for a command before servicing connections
    #[serde(default = "default_queue_wait_ms")]
    pub queue_wait_ms: u64,
    /// Service-step timeout used when none is given with PROCESS_LOOP
    #[serde(default)]
    pub process_loop_timeout_ms: u64,
    #[serde(default)]
    pub enqueue_policy: EnqueuePolicy,
    /// Upper bound on producer blocking under [`EnqueuePolicy::Block`]
    #[serde(default = "default_enqueue_block_ms")]
    pub enqueue_block_ms: u64,
    #[serde(default = "default_subscription_filter_max_len")]
    pub subscription_filter_max_len: usize,
}

/// What a producer does when the command queue is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnqueuePolicy {
    /// Reject the command immediately
    #[default]
    FailFast,
    /// Wait up to `enqueue_block_ms` for room
    Block,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            pending_acks_max: default_pending_acks_max(),
            subscriptions_max: default_subscriptions_max(),
            queue_capacity: default_queue_capacity(),
            queue_wait_ms: default_queue_wait_ms(),
            process_loop_timeout_ms: 0,
            enqueue_policy: EnqueuePolicy::default(),
            enqueue_block_ms: default_enqueue_block_ms(),
            subscription_filter_max_len: default_subscription_filter_max_len(),
        }
    }
}

impl AgentSection {
    pub fn queue_wait(&self) -> Duration {
        Duration::from_millis(self.queue_wait_ms)
    }

    pub fn process_loop_timeout(&self) -> Duration {
        Duration::from_millis(self.process_loop_timeout_ms)
    }

    pub fn enqueue_block(&self) -> Duration {
        Duration::from_millis(self.enqueue_block_ms)
    }

    /// Reject zero capacities
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("max_connections", self.max_connections),
            ("pending_acks_max", self.pending_acks_max),
            ("subscriptions_max", self.subscriptions_max),
            ("queue_capacity", self.queue_capacity),
            ("subscription_filter_max_len", self.subscription_filter_max_len),
        ];

        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "agent.{name} must be greater than zero"
                )));
            }
        }

        if self.max_connections > usize::from(u16::MAX) {
            return Err(ConfigError::InvalidConfig(format!(
                "agent.max_connections cannot exceed {}",
                u16::MAX
            )));
        }

        Ok(())
    }
}

fn default_max_connections() -> usize {
    2
}

fn default_pending_acks_max() -> usize {
    20
}

fn default_subscriptions_max() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    25
}

fn default_queue_wait_ms() -> u64 {
    1000
}

fn default_enqueue_block_ms() -> u64 {
    100
}

fn default_subscription_filter_max_len() -> usize {
    100
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Client identifier; a random one is generated when absent
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Largest packet the protocol client will encode or accept
    #[serde(default = "default_network_buffer_size")]
    pub network_buffer_size: usize,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

fn default_keep_alive_secs() -> u16 {
    60
}

fn default_clean_session() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_network_buffer_size() -> usize {
    1024
}

impl MqttSection {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Configured client id, or a fresh `mqtt-agent-<uuid>` one
    pub fn client_id_or_generate(&self) -> String {
        match &self.client_id {
            Some(id) => id.clone(),
            None => format!("mqtt-agent-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_url.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.broker_url cannot be empty".to_string(),
            ));
        }

        if let Some(id) = &self.client_id {
            if id.is_empty() || id.len() > usize::from(u16::MAX) {
                return Err(ConfigError::InvalidConfig(format!(
                    "mqtt.client_id '{id}' has an invalid length"
                )));
            }
        }

        if self.network_buffer_size < 16 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.network_buffer_size must be at least 16 bytes".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent.validate()?;
        self.mqtt.validate()
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

    /// Resolve both credentials, failing if a named variable is unset
    pub fn resolve_credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        let Some(username_env) = &self.mqtt.username_env else {
            return Ok(None);
        };

        let username = std::env::var(username_env)
            .map_err(|_| ConfigError::EnvVarNotFound(username_env.clone()))?;
        let password = match &self.mqtt.password_env {
            Some(password_env) => std::env::var(password_env)
                .map_err(|_| ConfigError::EnvVarNotFound(password_env.clone()))?,
            None => String::new(),
        };

        Ok(Some((username, password)))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
client_id = "test-agent"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
