//! Error types for the MQTT agent
//!
//! Capacity and handle errors are reported to the caller that triggered them;
//! protocol failures carry the [`MqttStatus`] the protocol client returned.

use crate::connection::ConnectionHandle;
use crate::protocol::MqttStatus;
use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Command queue is full")]
    QueueFull,

    #[error("Agent loop is not running")]
    AgentStopped,

    #[error("Invalid connection handle: {handle}")]
    InvalidHandle { handle: ConnectionHandle },

    #[error("Connection handle already in use: {handle}")]
    HandleInUse { handle: ConnectionHandle },

    #[error("Connection {handle} has not been connected")]
    NotConnected { handle: ConnectionHandle },

    #[error("Pending acknowledgment set is full ({capacity} entries)")]
    PendingAcksFull { capacity: usize },

    #[error("Subscription registry is full ({capacity} entries)")]
    SubscriptionsFull { capacity: usize },

    #[error("Already subscribed to '{filter}'")]
    SubscriptionExists { filter: String },

    #[error("Not subscribed to '{filter}'")]
    SubscriptionNotFound { filter: String },

    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(#[from] crate::protocol::TopicError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] MqttStatus),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AgentError {
    /// Create invalid handle error
    pub fn invalid_handle(handle: ConnectionHandle) -> Self {
        Self::InvalidHandle { handle }
    }

    /// Create subscription exists error
    pub fn subscription_exists<S: Into<String>>(filter: S) -> Self {
        Self::SubscriptionExists {
            filter: filter.into(),
        }
    }

    /// Create subscription not found error
    pub fn subscription_not_found<S: Into<String>>(filter: S) -> Self {
        Self::SubscriptionNotFound {
            filter: filter.into(),
        }
    }

    /// Protocol status carried by this error, if any
    pub fn status(&self) -> Option<MqttStatus> {
        match self {
            AgentError::Protocol(status) => Some(*status),
            _ => None,
        }
    }

    /// Whether the error reflects a capacity limit rather than a failure
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            AgentError::QueueFull
                | AgentError::PendingAcksFull { .. }
                | AgentError::SubscriptionsFull { .. }
        )
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
