//! Per-connection bookkeeping owned by the agent loop

pub mod pending_acks;
pub mod subscriptions;
pub mod table;

pub use pending_acks::{PendingAck, PendingAcks};
pub use subscriptions::{PublishCallback, SubscriptionEntry, SubscriptionRegistry};
pub use table::{ConnectionHandle, ConnectionSlot, ConnectionTable};
