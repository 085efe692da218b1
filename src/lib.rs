//! MQTT Agent
//!
//! Serializes every MQTT operation for a set of broker connections onto a
//! single task. Application code never touches a protocol context directly:
//! it enqueues commands through an [`AgentHandle`] and learns the outcome
//! through a completion callback, while [`MqttAgent::run`] drains the queue and
//! keeps each connection serviced between commands.
//!
//! # Overview
//!
//! - [`protocol`] - value types, status codes, the [`ProtocolClient`] seam and
//!   topic filter matching
//! - [`connection`] - connection slots with their pending acknowledgments and
//!   subscriptions
//! - [`agent`] - command queue, dispatch loop and session resumption
//! - [`transport`] - TCP transport and an MQTT 3.1.1 protocol client built on
//!   the `rumqttc` packet codec
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_agent::agent::{completion_channel, MqttAgent};
//! use mqtt_agent::config::AgentSection;
//! use mqtt_agent::connection::ConnectionHandle;
//! use mqtt_agent::protocol::{ConnectInfo, PublishInfo, QoS, SystemClock};
//! use mqtt_agent::testing::{MockProtocolClient, MockScript};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let mut agent: MqttAgent<MockProtocolClient> = MqttAgent::new(&AgentSection::default());
//! let connection = ConnectionHandle::new(0);
//! agent.initialize(connection, MockScript::new(), SystemClock::shared(), Arc::new(|_| {}))?;
//! agent
//!     .connect(connection, &ConnectInfo::new("device-1"), None, Duration::from_secs(5))
//!     .await?;
//!
//! let handle = agent.handle();
//! let (callback, done) = completion_channel();
//! handle
//!     .publish(connection, PublishInfo::new("sensors/1/temp", QoS::AtMostOnce, "21.5"), callback)
//!     .await?;
//! handle.terminate().await?;
//!
//! agent.run().await;
//! assert!(done.await.unwrap().is_ok());
//! # Ok::<(), mqtt_agent::AgentError>(())
//! # });
//! ```

pub mod agent;
pub mod config;
pub mod connection;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use agent::{AgentExit, AgentHandle, MqttAgent};
pub use config::{AgentConfig, ConfigError};
pub use connection::ConnectionHandle;
pub use error::{AgentError, AgentResult};
pub use protocol::*;
pub use transport::mqtt::MqttContext;
