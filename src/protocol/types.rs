//! Value types exchanged between the agent and a protocol client

use bytes::Bytes;
use std::time::Duration;

pub use rumqttc::mqttbytes::QoS;

/// Parameters of an MQTT CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub client_id: String,
    pub keep_alive: Duration,
    /// Ask the broker to discard any prior session state
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectInfo {
    pub fn new<S: Into<String>>(client_id: S) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            username: None,
            password: None,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_credentials<U: Into<String>, P: Into<String>>(
        mut self,
        username: U,
        password: P,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// An outgoing or incoming PUBLISH.
///
/// The payload is reference counted, so the agent can keep a publish in its
/// pending-acknowledgment set while the producer still holds its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishInfo {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Set when the publish is a retransmission
    pub dup: bool,
    /// Packet identifier of an incoming QoS>0 publish, 0 otherwise
    pub packet_id: u16,
}

impl PublishInfo {
    pub fn new<S: Into<String>, P: Into<Bytes>>(topic: S, qos: QoS, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
            packet_id: 0,
        }
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Whether this publish needs a broker acknowledgment
    pub fn requires_ack(&self) -> bool {
        self.qos != QoS::AtMostOnce
    }

    /// Copy of this publish flagged as a retransmission
    pub fn as_duplicate(&self) -> Self {
        Self {
            dup: true,
            ..self.clone()
        }
    }
}

/// A single topic filter to subscribe to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeInfo {
    pub filter: String,
    pub qos: QoS,
}

impl SubscribeInfo {
    pub fn new<S: Into<String>>(filter: S, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

/// Packets a protocol client hands back to the agent after a service step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingPacket {
    Publish(PublishInfo),
    /// QoS 1 publish acknowledged
    PubAck(u16),
    /// QoS 2 publish received by the broker; PUBREL has been sent
    PubRec(u16),
    /// QoS 2 publish flow completed
    PubComp(u16),
    SubAck {
        packet_id: u16,
        /// Granted QoS per filter, `None` where the broker refused it
        granted: Vec<Option<QoS>>,
    },
    UnsubAck(u16),
    PingResp,
}

impl IncomingPacket {
    /// Packet identifier of an outgoing publish this packet completes
    pub fn completed_publish(&self) -> Option<u16> {
        match self {
            IncomingPacket::PubAck(id) | IncomingPacket::PubComp(id) => Some(*id),
            _ => None,
        }
    }
}
