//! Transport layer for the MQTT agent
//!
//! A transport is any bidirectional async byte stream. The agent binds one to
//! each connection slot when the slot is allocated; [`mqtt::MqttContext`]
//! speaks MQTT 3.1.1 over it.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

pub mod mqtt;

pub use mqtt::{BrokerEndpoint, MqttContext, MqttError, NetworkContext};

/// Byte stream a protocol context can be bound to
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Open a plain TCP transport to the broker
pub async fn connect_tcp(endpoint: &BrokerEndpoint) -> Result<TcpStream, MqttError> {
    debug!(host = %endpoint.host, port = endpoint.port, "Opening TCP transport");

    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;
    stream
        .set_nodelay(true)
        .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;

    info!(host = %endpoint.host, port = endpoint.port, "TCP transport established");
    Ok(stream)
}
