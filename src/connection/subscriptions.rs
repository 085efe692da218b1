//! Active topic filters and the callbacks that receive their publishes

use crate::error::{AgentError, AgentResult};
use crate::protocol::{topic_matches_filter, PublishInfo, QoS, SubscribeInfo};
use std::fmt;
use std::sync::Arc;

/// Receives incoming publishes for a subscription or a connection's default route
pub type PublishCallback = Arc<dyn Fn(&PublishInfo) + Send + Sync>;

/// One registered filter
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub filter: String,
    pub qos: QoS,
    pub callback: PublishCallback,
}

impl SubscriptionEntry {
    pub fn subscribe_info(&self) -> SubscribeInfo {
        SubscribeInfo::new(self.filter.clone(), self.qos)
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Bounded registry of subscriptions for one connection
#[derive(Debug)]
pub struct SubscriptionRegistry {
    entries: Vec<SubscriptionEntry>,
    capacity: usize,
}

impl SubscriptionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Check that `filter` could be added without modifying the registry
    pub fn check_add(&self, filter: &str) -> AgentResult<()> {
        if self.contains(filter) {
            return Err(AgentError::subscription_exists(filter));
        }

        if self.entries.len() >= self.capacity {
            return Err(AgentError::SubscriptionsFull {
                capacity: self.capacity,
            });
        }

        Ok(())
    }

    pub fn add<S: Into<String>>(
        &mut self,
        filter: S,
        qos: QoS,
        callback: PublishCallback,
    ) -> AgentResult<()> {
        let filter = filter.into();
        self.check_add(&filter)?;

        self.entries.push(SubscriptionEntry {
            filter,
            qos,
            callback,
        });
        Ok(())
    }

    pub fn remove(&mut self, filter: &str) -> AgentResult<SubscriptionEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.filter == filter)
            .ok_or_else(|| AgentError::subscription_not_found(filter))?;

        Ok(self.entries.remove(index))
    }

    /// Callback of the first registered filter matching `topic`
    pub fn match_topic(&self, topic: &str) -> Option<&PublishCallback> {
        self.entries
            .iter()
            .find(|e| topic_matches_filter(topic, &e.filter))
            .map(|e| &e.callback)
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.entries.iter().any(|e| e.filter == filter)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionEntry> {
        self.entries.iter()
    }

    pub fn filters(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.filter.clone()).collect()
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
}
