//! Broker addressing and CONNECT parameters derived from configuration
//!
//! Pure functions only; nothing here touches the network.

use crate::config::{AgentConfig, ConfigError};
use crate::protocol::ConnectInfo;
use thiserror::Error;
use url::Url;

const DEFAULT_MQTT_PORT: u16 = 1883;

/// MQTT transport setup errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Unsupported broker URL scheme '{0}', expected mqtt or tcp")]
    UnsupportedScheme(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Host and port of the broker to open a transport to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

/// Parse a `mqtt://host[:port]` broker URL.
///
/// `tcp://` is accepted as an alias. Only plain TCP transports are opened by
/// this crate, so `mqtts://` and anything else is rejected.
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerEndpoint, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    match url.scheme() {
        "mqtt" | "tcp" => {}
        other => return Err(MqttError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(DEFAULT_MQTT_PORT);

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
    })
}

/// Build the CONNECT parameters for the configured broker.
///
/// Credentials are read from the environment variables named in the config.
pub fn connect_info_from_config(config: &AgentConfig) -> Result<ConnectInfo, MqttError> {
    let mut info = ConnectInfo::new(config.mqtt.client_id_or_generate())
        .with_keep_alive(config.mqtt.keep_alive())
        .with_clean_session(config.mqtt.clean_session);

    if let Some((username, password)) = config.resolve_credentials()? {
        info = info.with_credentials(username, password);
    }

    Ok(info)
}
