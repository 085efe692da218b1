//! Status codes returned by a protocol client
//!
//! The set is closed: every protocol operation either succeeds or yields one of
//! these codes. The agent never interprets them beyond deciding whether a
//! failure on the servicing path is fatal for the connection.

use thiserror::Error;

/// Failure status reported by a [`ProtocolClient`](super::ProtocolClient) operation
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MqttStatus {
    #[error("Bad parameter")]
    BadParameter,
    #[error("Packet does not fit in the network buffer")]
    NoMemory,
    #[error("Transport send failed")]
    SendFailed,
    #[error("Transport receive failed")]
    RecvFailed,
    #[error("Malformed or unexpected packet from broker")]
    BadResponse,
    #[error("Broker refused the connection")]
    ServerRefused,
    #[error("No data available before the timeout elapsed")]
    NoDataAvailable,
    #[error("Operation not valid in the current protocol state")]
    IllegalState,
    #[error("Packet identifier already in use")]
    StateCollision,
    #[error("Keep-alive response not received in time")]
    KeepAliveTimeout,
}

impl MqttStatus {
    /// Whether the connection can no longer be serviced after this status.
    ///
    /// Only these statuses stop the agent loop when they surface on the
    /// servicing path; everything else is reported and the loop carries on.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            MqttStatus::SendFailed
                | MqttStatus::RecvFailed
                | MqttStatus::KeepAliveTimeout
                | MqttStatus::BadResponse
        )
    }

    /// Whether the packet could have reached the transport before the failure
    pub fn may_have_been_sent(&self) -> bool {
        !matches!(self, MqttStatus::BadParameter | MqttStatus::NoMemory)
    }
}
