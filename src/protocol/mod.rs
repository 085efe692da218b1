//! MQTT protocol surface consumed by the agent
//!
//! Value types, the closed status set, topic rules and the [`ProtocolClient`]
//! seam between the dispatch loop and the wire.

pub mod client;
pub mod status;
pub mod topics;
pub mod types;

pub use client::{Clock, ProtocolClient, SystemClock};
pub use status::MqttStatus;
pub use topics::{topic_matches_filter, validate_topic_filter, validate_topic_name, TopicError};
pub use types::{ConnectInfo, IncomingPacket, PublishInfo, QoS, SubscribeInfo};
