//! Mock implementations for testing
//!
//! [`MockProtocolClient`] stands in for a real MQTT protocol context. Its
//! transport is a [`MockScript`]: a shared recorder that captures every call the
//! agent makes and feeds back scripted results, failures and incoming packets.

use crate::protocol::{
    Clock, ConnectInfo, IncomingPacket, MqttStatus, ProtocolClient, PublishInfo, SubscribeInfo,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Protocol operations a failure can be scripted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Connect,
    Subscribe,
    Unsubscribe,
    Publish,
    Release,
    Ping,
    Disconnect,
    ProcessLoop,
}

/// A call the agent made on the mock client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect {
        client_id: String,
        clean_session: bool,
        will_topic: Option<String>,
    },
    Subscribe {
        filters: Vec<String>,
        packet_id: u16,
    },
    Unsubscribe {
        filters: Vec<String>,
        packet_id: u16,
    },
    Publish {
        publish: PublishInfo,
        packet_id: u16,
    },
    Release {
        packet_id: u16,
    },
    Ping,
    Disconnect,
    ProcessLoop {
        timeout: Duration,
    },
}

impl MockCall {
    pub fn operation(&self) -> MockOperation {
        match self {
            MockCall::Connect { .. } => MockOperation::Connect,
            MockCall::Subscribe { .. } => MockOperation::Subscribe,
            MockCall::Unsubscribe { .. } => MockOperation::Unsubscribe,
            MockCall::Publish { .. } => MockOperation::Publish,
            MockCall::Release { .. } => MockOperation::Release,
            MockCall::Ping => MockOperation::Ping,
            MockCall::Disconnect => MockOperation::Disconnect,
            MockCall::ProcessLoop { .. } => MockOperation::ProcessLoop,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    session_present: bool,
    failures: HashMap<MockOperation, VecDeque<MqttStatus>>,
    incoming: VecDeque<Vec<IncomingPacket>>,
    auto_ack: bool,
}

/// Shared script and call recorder for [`MockProtocolClient`]
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    state: Arc<Mutex<MockState>>,
}

impl MockScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session-present flag reported by subsequent CONNACKs
    pub async fn set_session_present(&self, session_present: bool) {
        self.state.lock().await.session_present = session_present;
    }

    /// Make the next call of `operation` fail with `status`; repeated calls queue up
    pub async fn fail_next(&self, operation: MockOperation, status: MqttStatus) {
        self.state
            .lock()
            .await
            .failures
            .entry(operation)
            .or_default()
            .push_back(status);
    }

    /// Packets returned by the next service step
    pub async fn push_incoming(&self, packets: Vec<IncomingPacket>) {
        self.state.lock().await.incoming.push_back(packets);
    }

    /// Acknowledge every QoS>0 publish on the following service step
    pub async fn set_auto_ack(&self, auto_ack: bool) {
        self.state.lock().await.auto_ack = auto_ack;
    }

    pub async fn calls(&self) -> Vec<MockCall> {
        self.state.lock().await.calls.clone()
    }

    /// Recorded calls other than service steps
    pub async fn operations(&self) -> Vec<MockCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.operation() != MockOperation::ProcessLoop)
            .cloned()
            .collect()
    }

    pub async fn published(&self) -> Vec<(u16, PublishInfo)> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Publish { publish, packet_id } => Some((*packet_id, publish.clone())),
                _ => None,
            })
            .collect()
    }

    pub async fn subscribed_filters(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Subscribe { filters, .. } => Some(filters.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub async fn count(&self, operation: MockOperation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    pub async fn clear_history(&self) {
        self.state.lock().await.calls.clear();
    }

    async fn record(&self, call: MockCall) -> Result<(), MqttStatus> {
        let mut state = self.state.lock().await;
        let operation = call.operation();
        state.calls.push(call);

        match state
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

/// Clock that only moves when a test advances it
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn shared(&self) -> Arc<dyn Clock> {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Scripted protocol client
pub struct MockProtocolClient {
    script: MockScript,
    next_packet_id: u16,
    unacked: Vec<(u16, PublishInfo)>,
}

impl MockProtocolClient {
    pub fn script(&self) -> &MockScript {
        &self.script
    }
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    type Transport = MockScript;

    fn bind(transport: MockScript, _clock: Arc<dyn Clock>) -> Self {
        Self {
            script: transport,
            next_packet_id: 0,
            unacked: Vec::new(),
        }
    }

    async fn connect(
        &mut self,
        info: &ConnectInfo,
        will: Option<&PublishInfo>,
        _timeout: Duration,
    ) -> Result<bool, MqttStatus> {
        self.script
            .record(MockCall::Connect {
                client_id: info.client_id.clone(),
                clean_session: info.clean_session,
                will_topic: will.map(|w| w.topic.clone()),
            })
            .await?;

        Ok(self.script.state.lock().await.session_present)
    }

    async fn subscribe(
        &mut self,
        subscriptions: &[SubscribeInfo],
        packet_id: u16,
    ) -> Result<(), MqttStatus> {
        self.script
            .record(MockCall::Subscribe {
                filters: subscriptions.iter().map(|s| s.filter.clone()).collect(),
                packet_id,
            })
            .await
    }

    async fn unsubscribe(&mut self, filters: &[String], packet_id: u16) -> Result<(), MqttStatus> {
        self.script
            .record(MockCall::Unsubscribe {
                filters: filters.to_vec(),
                packet_id,
            })
            .await
    }

    async fn publish(&mut self, publish: &PublishInfo, packet_id: u16) -> Result<(), MqttStatus> {
        self.script
            .record(MockCall::Publish {
                publish: publish.clone(),
                packet_id,
            })
            .await?;

        if publish.requires_ack() {
            self.unacked.push((packet_id, publish.clone()));
        }
        Ok(())
    }

    async fn release(&mut self, packet_id: u16) -> Result<(), MqttStatus> {
        self.script.record(MockCall::Release { packet_id }).await
    }

    async fn ping(&mut self) -> Result<(), MqttStatus> {
        self.script.record(MockCall::Ping).await
    }

    async fn disconnect(&mut self) -> Result<(), MqttStatus> {
        self.script.record(MockCall::Disconnect).await
    }

    async fn process_loop(&mut self, timeout: Duration) -> Result<Vec<IncomingPacket>, MqttStatus> {
        self.script
            .record(MockCall::ProcessLoop { timeout })
            .await?;

        let mut state = self.script.state.lock().await;
        let mut packets = state.incoming.pop_front().unwrap_or_default();

        if state.auto_ack {
            for (packet_id, publish) in self.unacked.drain(..) {
                match publish.qos {
                    crate::protocol::QoS::ExactlyOnce => {
                        packets.push(IncomingPacket::PubRec(packet_id));
                        packets.push(IncomingPacket::PubComp(packet_id));
                    }
                    _ => packets.push(IncomingPacket::PubAck(packet_id)),
                }
            }
        }

        Ok(packets)
    }

    fn next_packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        self.next_packet_id
    }
}
