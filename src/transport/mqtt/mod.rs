//! MQTT 3.1.1 over a byte-stream transport
//!
//! - [`connection`] - broker URL parsing and CONNECT parameters from config
//! - [`context`] - [`MqttContext`], the codec-backed protocol client
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_agent::config::AgentConfig;
//! use mqtt_agent::protocol::{ProtocolClient, SystemClock};
//! use mqtt_agent::transport::{connect_tcp, mqtt};
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = AgentConfig::load_from_file(Path::new("agent.toml"))?;
//! let endpoint = mqtt::parse_broker_url(&config.mqtt.broker_url)?;
//! let stream = connect_tcp(&endpoint).await?;
//!
//! let network = mqtt::NetworkContext::new(stream, config.mqtt.network_buffer_size);
//! let mut context = mqtt::MqttContext::bind(network, SystemClock::shared());
//! let info = mqtt::connect_info_from_config(&config)?;
//! let session_present = context
//!     .connect(&info, None, config.mqtt.connect_timeout())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod context;

pub use connection::{connect_info_from_config, parse_broker_url, BrokerEndpoint, MqttError};
pub use context::{MqttContext, NetworkContext, PINGRESP_TIMEOUT_MS};
