//! Protocol client and time source abstractions
//!
//! The agent never encodes MQTT packets itself. Everything on the wire goes
//! through a [`ProtocolClient`] bound to one transport, so the dispatch loop
//! can be driven by the real codec-backed client or by a scripted mock.

use super::status::MqttStatus;
use super::types::{ConnectInfo, IncomingPacket, PublishInfo, SubscribeInfo};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonically non-decreasing millisecond counter used for keep-alive timing
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Clock backed by the tokio runtime's monotonic instant
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Shared handle suitable for [`ProtocolClient::bind`]
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// One MQTT protocol context bound to a transport.
///
/// Every call runs to completion on the agent's task; implementations must not
/// spawn work that touches the transport behind the agent's back.
#[async_trait]
pub trait ProtocolClient: Send + 'static {
    /// Byte stream this context is bound to when a connection slot is allocated
    type Transport: Send + 'static;

    /// Bind a fresh protocol context to a transport and time source
    fn bind(transport: Self::Transport, clock: Arc<dyn Clock>) -> Self
    where
        Self: Sized;

    /// Send CONNECT and wait up to `timeout` for CONNACK.
    ///
    /// Returns the broker's session-present flag.
    async fn connect(
        &mut self,
        info: &ConnectInfo,
        will: Option<&PublishInfo>,
        timeout: Duration,
    ) -> Result<bool, MqttStatus>;

    async fn subscribe(
        &mut self,
        subscriptions: &[SubscribeInfo],
        packet_id: u16,
    ) -> Result<(), MqttStatus>;

    async fn unsubscribe(&mut self, filters: &[String], packet_id: u16) -> Result<(), MqttStatus>;

    /// Send a PUBLISH. `packet_id` is ignored for QoS 0.
    async fn publish(&mut self, publish: &PublishInfo, packet_id: u16) -> Result<(), MqttStatus>;

    /// Send PUBREL for a QoS 2 publish the broker has already received
    async fn release(&mut self, packet_id: u16) -> Result<(), MqttStatus>;

    async fn ping(&mut self) -> Result<(), MqttStatus>;

    async fn disconnect(&mut self) -> Result<(), MqttStatus>;

    /// Service the connection once: receive whatever arrives within `timeout`,
    /// answer protocol-level acknowledgments and keep-alive, and hand the
    /// packets the agent cares about back to it.
    async fn process_loop(&mut self, timeout: Duration) -> Result<Vec<IncomingPacket>, MqttStatus>;

    /// Allocate the next non-zero packet identifier
    fn next_packet_id(&mut self) -> u16;
}
