//! Outgoing QoS>0 publishes awaiting broker acknowledgment
//!
//! Entries are kept in send order so a resumed session retransmits them in the
//! order the broker first saw them.

use crate::error::{AgentError, AgentResult};
use crate::protocol::{MqttStatus, PublishInfo};
use std::collections::VecDeque;
use tracing::debug;

/// A publish the broker has not acknowledged yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAck {
    pub packet_id: u16,
    pub publish: PublishInfo,
    /// PUBREC arrived for this QoS 2 publish; only PUBCOMP is outstanding
    pub released: bool,
}

/// Bounded, insertion-ordered set of unacknowledged publishes
#[derive(Debug)]
pub struct PendingAcks {
    entries: VecDeque<PendingAck>,
    capacity: usize,
}

impl PendingAcks {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a publish before it is handed to the transport
    pub fn track(&mut self, packet_id: u16, publish: PublishInfo) -> AgentResult<()> {
        if self.contains(packet_id) {
            return Err(MqttStatus::StateCollision.into());
        }

        if self.entries.len() >= self.capacity {
            return Err(AgentError::PendingAcksFull {
                capacity: self.capacity,
            });
        }

        self.entries.push_back(PendingAck {
            packet_id,
            publish,
            released: false,
        });
        Ok(())
    }

    /// Remove the entry for `packet_id`.
    ///
    /// Returns `None` for duplicate or late acknowledgments, which are not errors.
    pub fn acknowledge(&mut self, packet_id: u16) -> Option<PendingAck> {
        let position = self.entries.iter().position(|e| e.packet_id == packet_id);
        match position {
            Some(index) => self.entries.remove(index),
            None => {
                debug!(packet_id, "Acknowledgment for untracked packet ignored");
                None
            }
        }
    }

    /// Record that the broker has received a QoS 2 publish.
    ///
    /// Returns `false` when `packet_id` is not tracked.
    pub fn mark_released(&mut self, packet_id: u16) -> bool {
        match self.entries.iter_mut().find(|e| e.packet_id == packet_id) {
            Some(entry) => {
                entry.released = true;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.entries.iter().any(|e| e.packet_id == packet_id)
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &PendingAck> {
        self.entries.iter()
    }

    pub fn packet_ids(&self) -> Vec<u16> {
        self.entries.iter().map(|e| e.packet_id).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
