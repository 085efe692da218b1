//! Test helpers and utilities for integration tests

use bytes::BytesMut;
use mqtt_agent::agent::MqttAgent;
use mqtt_agent::config::AgentSection;
use mqtt_agent::connection::{ConnectionHandle, PublishCallback};
use mqtt_agent::protocol::{Clock, ConnectInfo, ProtocolClient, PublishInfo, SystemClock};
use mqtt_agent::testing::{MockProtocolClient, MockScript};
use mqtt_agent::transport::mqtt::{MqttContext, NetworkContext};
use rumqttc::mqttbytes::v4::{self, ConnAck, Connect, ConnectReturnCode, Packet};
use rumqttc::mqttbytes::Error as CodecError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

#[allow(dead_code)]
pub const H0: ConnectionHandle = ConnectionHandle::new(0);
#[allow(dead_code)]
pub const H1: ConnectionHandle = ConnectionHandle::new(1);

/// Agent settings with a short dequeue wait so loops spin quickly in tests
#[allow(dead_code)]
pub fn test_agent_section() -> AgentSection {
    AgentSection {
        queue_wait_ms: 10,
        ..AgentSection::default()
    }
}

#[allow(dead_code)]
pub fn noop_callback() -> PublishCallback {
    Arc::new(|_| {})
}

/// Callback that records the topic of every publish it receives
#[allow(dead_code)]
pub fn recording_callback() -> (PublishCallback, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: PublishCallback = Arc::new(move |publish: &PublishInfo| {
        sink.lock().unwrap().push(publish.topic.clone());
    });
    (callback, seen)
}

/// Mock-backed agent with `handle` initialized and connected
#[allow(dead_code)]
pub async fn connected_mock_agent(
    script: &MockScript,
    handle: ConnectionHandle,
    default_callback: PublishCallback,
) -> MqttAgent<MockProtocolClient> {
    let mut agent = MqttAgent::new(&test_agent_section());
    add_connected(&mut agent, script, handle, default_callback).await;
    agent
}

/// Initialize and connect one more mock connection on an existing agent
#[allow(dead_code)]
pub async fn add_connected(
    agent: &mut MqttAgent<MockProtocolClient>,
    script: &MockScript,
    handle: ConnectionHandle,
    default_callback: PublishCallback,
) {
    agent
        .initialize(handle, script.clone(), SystemClock::shared(), default_callback)
        .unwrap();
    agent
        .connect(
            handle,
            &ConnectInfo::new(format!("client-{handle}")),
            None,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    script.clear_history().await;
}

/// Broker side of an in-memory MQTT connection
#[allow(dead_code)]
pub struct FakeBroker {
    stream: DuplexStream,
    buf: BytesMut,
}

#[allow(dead_code)]
impl FakeBroker {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Next packet from the client; `None` once the client has closed the stream
    pub async fn try_recv(&mut self) -> Option<Packet> {
        loop {
            match v4::read(&mut self.buf, 64 * 1024) {
                Ok(packet) => return Some(packet),
                Err(CodecError::InsufficientBytes(_)) => {}
                Err(e) => panic!("client sent a malformed packet: {e}"),
            }

            let read = self.stream.read_buf(&mut self.buf).await.unwrap();
            if read == 0 {
                return None;
            }
        }
    }

    pub async fn recv(&mut self) -> Packet {
        self.try_recv().await.expect("client closed the connection")
    }

    pub async fn send<F>(&mut self, encode: F)
    where
        F: FnOnce(&mut BytesMut) -> Result<usize, CodecError>,
    {
        let mut out = BytesMut::new();
        encode(&mut out).unwrap();
        self.stream.write_all(&out).await.unwrap();
    }

    /// Read CONNECT and answer it
    pub async fn accept(&mut self, code: ConnectReturnCode, session_present: bool) -> Connect {
        match self.recv().await {
            Packet::Connect(connect) => {
                self.send(|buf| ConnAck::new(code, session_present).write(buf))
                    .await;
                connect
            }
            other => panic!("expected CONNECT, got {other:?}"),
        }
    }

    /// Drop the broker side, closing the stream
    pub fn close(self) {}
}

/// A real protocol context wired to a fake broker
#[allow(dead_code)]
pub fn context_pair(
    buffer_size: usize,
    clock: Arc<dyn Clock>,
) -> (MqttContext<DuplexStream>, FakeBroker) {
    let (client, broker) = network_pair(buffer_size);
    (MqttContext::bind(client, clock), broker)
}

/// Transport for an agent slot plus the broker on the other end
#[allow(dead_code)]
pub fn network_pair(buffer_size: usize) -> (NetworkContext<DuplexStream>, FakeBroker) {
    let (client, broker) = tokio::io::duplex(64 * 1024);
    (
        NetworkContext::new(client, buffer_size),
        FakeBroker::new(broker),
    )
}
