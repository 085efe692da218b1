//! Fixed-capacity table of connection slots indexed by handle

use super::pending_acks::PendingAcks;
use super::subscriptions::{PublishCallback, SubscriptionRegistry};
use crate::error::{AgentError, AgentResult};
use crate::protocol::{MqttStatus, ProtocolClient, PublishInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionHandle(u16);

impl ConnectionHandle {
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ConnectionHandle {
    fn from(index: u16) -> Self {
        Self(index)
    }
}

/// State owned by one allocated connection
pub struct ConnectionSlot<C> {
    pub client: C,
    pub pending_acks: PendingAcks,
    pub subscriptions: SubscriptionRegistry,
    /// Receives publishes no subscription matches
    pub default_callback: PublishCallback,
    /// Set once CONNECT has succeeded, cleared by DISCONNECT
    pub connected: bool,
}

impl<C> ConnectionSlot<C> {
    /// Route an incoming publish to its subscription, or to the default callback.
    ///
    /// Returns whether a subscription matched.
    pub fn deliver(&self, publish: &PublishInfo) -> bool {
        match self.subscriptions.match_topic(&publish.topic) {
            Some(callback) => {
                callback(publish);
                true
            }
            None => {
                (self.default_callback)(publish);
                false
            }
        }
    }
}

impl<C: ProtocolClient> ConnectionSlot<C> {
    /// Next packet identifier not held by an unacknowledged publish.
    ///
    /// A rebound client restarts its counter while the pending set keeps the
    /// identifiers of the previous transport, so colliding ids are skipped.
    pub fn next_packet_id(&mut self) -> AgentResult<u16> {
        for _ in 0..=self.pending_acks.capacity() {
            let packet_id = self.client.next_packet_id();
            if !self.pending_acks.contains(packet_id) {
                return Ok(packet_id);
            }
        }
        Err(MqttStatus::StateCollision.into())
    }
}

impl<C> fmt::Debug for ConnectionSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("pending_acks", &self.pending_acks)
            .field("subscriptions", &self.subscriptions)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

/// Arena of connection slots; a slot is either free (`None`) or allocated
pub struct ConnectionTable<C> {
    slots: Vec<Option<ConnectionSlot<C>>>,
    pending_acks_max: usize,
    subscriptions_max: usize,
}

impl<C: ProtocolClient> ConnectionTable<C> {
    pub fn new(max_connections: usize, pending_acks_max: usize, subscriptions_max: usize) -> Self {
        let mut slots = Vec::with_capacity(max_connections);
        slots.resize_with(max_connections, || None);

        Self {
            slots,
            pending_acks_max,
            subscriptions_max,
        }
    }

    /// Bind a protocol client to a free slot
    pub fn allocate(
        &mut self,
        handle: ConnectionHandle,
        client: C,
        default_callback: PublishCallback,
    ) -> AgentResult<&mut ConnectionSlot<C>> {
        let pending_acks_max = self.pending_acks_max;
        let subscriptions_max = self.subscriptions_max;

        let entry = self
            .slots
            .get_mut(handle.index())
            .ok_or_else(|| AgentError::invalid_handle(handle))?;

        if entry.is_some() {
            return Err(AgentError::HandleInUse { handle });
        }

        Ok(entry.insert(ConnectionSlot {
            client,
            pending_acks: PendingAcks::new(pending_acks_max),
            subscriptions: SubscriptionRegistry::new(subscriptions_max),
            default_callback,
            connected: false,
        }))
    }

    pub fn resolve(&self, handle: ConnectionHandle) -> AgentResult<&ConnectionSlot<C>> {
        self.slots
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| AgentError::invalid_handle(handle))
    }

    pub fn resolve_mut(&mut self, handle: ConnectionHandle) -> AgentResult<&mut ConnectionSlot<C>> {
        self.slots
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| AgentError::invalid_handle(handle))
    }

    /// Free a slot, dropping its pending acknowledgments and subscriptions.
    ///
    /// The protocol client is handed back so the caller can tear down its transport.
    pub fn release(&mut self, handle: ConnectionHandle) -> AgentResult<C> {
        let slot = self
            .slots
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or_else(|| AgentError::invalid_handle(handle))?;

        Ok(slot.client)
    }

    pub fn is_allocated(&self, handle: ConnectionHandle) -> bool {
        self.resolve(handle).is_ok()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn allocated_handles(&self) -> Vec<ConnectionHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .filter_map(|(index, _)| u16::try_from(index).ok().map(ConnectionHandle::new))
            .collect()
    }
}
