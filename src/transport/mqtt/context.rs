//! MQTT 3.1.1 protocol context over an async byte stream
//!
//! Encoding and decoding use `rumqttc`'s v4 packet codec; this module owns the
//! protocol state around it: CONNECT/CONNACK, acknowledgment of incoming QoS 1
//! and QoS 2 publishes, the outgoing QoS 2 handshake and keep-alive.
//!
//! Outgoing packets are encoded into a buffer bounded by the network buffer
//! size and rejected with [`MqttStatus::NoMemory`] when they do not fit.

use crate::protocol::{
    Clock, ConnectInfo, IncomingPacket, MqttStatus, ProtocolClient, PublishInfo, SubscribeInfo,
};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::BytesMut;
use rumqttc::mqttbytes::v4::{
    self, ConnectReturnCode, Disconnect, LastWill, Packet, PingReq, PubAck, PubComp, PubRec,
    PubRel, Publish, Subscribe, SubscribeFilter, SubscribeReasonCode, Unsubscribe,
};
use rumqttc::mqttbytes::{Error as CodecError, QoS};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// How long to wait for PINGRESP once PINGREQ has gone out
pub const PINGRESP_TIMEOUT_MS: u64 = 5000;

/// A transport together with the size of the buffer packets are encoded into
#[derive(Debug)]
pub struct NetworkContext<T> {
    stream: T,
    buffer_size: usize,
}

impl<T: Transport> NetworkContext<T> {
    pub fn new(stream: T, buffer_size: usize) -> Self {
        Self {
            stream,
            buffer_size,
        }
    }
}

/// Codec-backed [`ProtocolClient`]
pub struct MqttContext<T> {
    stream: T,
    buffer_size: usize,
    read_buf: BytesMut,
    write_buf: BytesMut,
    clock: Arc<dyn Clock>,
    connected: bool,
    keep_alive_ms: u64,
    last_sent_ms: u64,
    ping_sent_ms: Option<u64>,
    next_packet_id: u16,
    /// Incoming QoS 2 publishes delivered but not yet released
    incoming_qos2: HashSet<u16>,
}

impl<T: Transport> MqttContext<T> {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether a PINGREQ is outstanding
    pub fn awaiting_ping_response(&self) -> bool {
        self.ping_sent_ms.is_some()
    }

    fn ensure_connected(&self) -> Result<(), MqttStatus> {
        if self.connected {
            Ok(())
        } else {
            Err(MqttStatus::IllegalState)
        }
    }

    fn encode<F>(&mut self, encode: F) -> Result<(), MqttStatus>
    where
        F: FnOnce(&mut BytesMut) -> Result<usize, CodecError>,
    {
        self.write_buf.clear();
        encode(&mut self.write_buf).map_err(|error| {
            debug!(%error, "Packet encoding failed");
            MqttStatus::BadParameter
        })?;

        if self.write_buf.len() > self.buffer_size {
            debug!(
                size = self.write_buf.len(),
                buffer_size = self.buffer_size,
                "Packet exceeds network buffer"
            );
            return Err(MqttStatus::NoMemory);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), MqttStatus> {
        if let Err(error) = self.stream.write_all(&self.write_buf).await {
            warn!(%error, "Transport write failed");
            return Err(MqttStatus::SendFailed);
        }
        if let Err(error) = self.stream.flush().await {
            warn!(%error, "Transport flush failed");
            return Err(MqttStatus::SendFailed);
        }

        self.last_sent_ms = self.clock.now_ms();
        trace!(bytes = self.write_buf.len(), "Packet sent");
        Ok(())
    }

    /// Decode the next packet, reading from the transport until `deadline`.
    ///
    /// Returns `Ok(None)` when nothing complete arrived in time.
    async fn read_packet(&mut self, deadline: Instant) -> Result<Option<Packet>, MqttStatus> {
        loop {
            match v4::read(&mut self.read_buf, self.buffer_size) {
                Ok(packet) => return Ok(Some(packet)),
                Err(CodecError::InsufficientBytes(_)) => {}
                Err(error) => {
                    warn!(%error, "Malformed packet from broker");
                    return Err(MqttStatus::BadResponse);
                }
            }

            match timeout_at(deadline, self.stream.read_buf(&mut self.read_buf)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(0)) => {
                    warn!("Broker closed the connection");
                    self.connected = false;
                    return Err(MqttStatus::RecvFailed);
                }
                Ok(Ok(read)) => trace!(bytes = read, "Received bytes"),
                Ok(Err(error)) => {
                    warn!(%error, "Transport read failed");
                    return Err(MqttStatus::RecvFailed);
                }
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<Option<IncomingPacket>, MqttStatus> {
        match packet {
            Packet::Publish(publish) => self.handle_publish(publish).await,
            Packet::PubAck(ack) => Ok(Some(IncomingPacket::PubAck(ack.pkid))),
            Packet::PubRec(rec) => {
                self.release(rec.pkid).await?;
                Ok(Some(IncomingPacket::PubRec(rec.pkid)))
            }
            Packet::PubRel(rel) => {
                self.incoming_qos2.remove(&rel.pkid);
                self.encode(|buf| PubComp::new(rel.pkid).write(buf))?;
                self.flush().await?;
                Ok(None)
            }
            Packet::PubComp(comp) => Ok(Some(IncomingPacket::PubComp(comp.pkid))),
            Packet::SubAck(suback) => Ok(Some(IncomingPacket::SubAck {
                packet_id: suback.pkid,
                granted: suback
                    .return_codes
                    .iter()
                    .map(|code| match code {
                        SubscribeReasonCode::Success(qos) => Some(*qos),
                        SubscribeReasonCode::Failure => None,
                    })
                    .collect(),
            })),
            Packet::UnsubAck(unsuback) => Ok(Some(IncomingPacket::UnsubAck(unsuback.pkid))),
            Packet::PingResp => {
                self.ping_sent_ms = None;
                Ok(Some(IncomingPacket::PingResp))
            }
            other => {
                warn!(packet = ?other, "Unexpected packet from broker");
                Err(MqttStatus::BadResponse)
            }
        }
    }

    async fn handle_publish(&mut self, publish: Publish) -> Result<Option<IncomingPacket>, MqttStatus> {
        let first_delivery = match publish.qos {
            QoS::AtMostOnce => true,
            QoS::AtLeastOnce => {
                self.encode(|buf| PubAck::new(publish.pkid).write(buf))?;
                self.flush().await?;
                true
            }
            QoS::ExactlyOnce => {
                self.encode(|buf| PubRec::new(publish.pkid).write(buf))?;
                self.flush().await?;
                self.incoming_qos2.insert(publish.pkid)
            }
        };

        if !first_delivery {
            debug!(packet_id = publish.pkid, "Duplicate QoS 2 publish suppressed");
            return Ok(None);
        }

        Ok(Some(IncomingPacket::Publish(PublishInfo {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
            dup: publish.dup,
            packet_id: publish.pkid,
        })))
    }

    async fn manage_keep_alive(&mut self) -> Result<(), MqttStatus> {
        if self.keep_alive_ms == 0 {
            return Ok(());
        }

        let now = self.clock.now_ms();
        match self.ping_sent_ms {
            Some(sent) if now.saturating_sub(sent) >= PINGRESP_TIMEOUT_MS => {
                warn!(waited_ms = now - sent, "PINGRESP not received");
                Err(MqttStatus::KeepAliveTimeout)
            }
            Some(_) => Ok(()),
            None if now.saturating_sub(self.last_sent_ms) >= self.keep_alive_ms => {
                debug!("Connection idle, sending PINGREQ");
                self.ping().await
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T: Transport> ProtocolClient for MqttContext<T> {
    type Transport = NetworkContext<T>;

    fn bind(transport: NetworkContext<T>, clock: Arc<dyn Clock>) -> Self {
        Self {
            stream: transport.stream,
            buffer_size: transport.buffer_size,
            read_buf: BytesMut::with_capacity(transport.buffer_size),
            write_buf: BytesMut::with_capacity(transport.buffer_size),
            clock,
            connected: false,
            keep_alive_ms: 0,
            last_sent_ms: 0,
            ping_sent_ms: None,
            next_packet_id: 0,
            incoming_qos2: HashSet::new(),
        }
    }

    async fn connect(
        &mut self,
        info: &ConnectInfo,
        will: Option<&PublishInfo>,
        timeout: Duration,
    ) -> Result<bool, MqttStatus> {
        let mut connect = v4::Connect::new(info.client_id.as_str());
        connect.keep_alive = u16::try_from(info.keep_alive.as_secs()).unwrap_or(u16::MAX);
        connect.clean_session = info.clean_session;
        connect.last_will = will.map(|will| LastWill {
            topic: will.topic.clone(),
            message: will.payload.clone(),
            qos: will.qos,
            retain: will.retain,
        });
        if let Some(username) = &info.username {
            connect.set_login(username.as_str(), info.password.clone().unwrap_or_default());
        }

        self.connected = false;
        self.read_buf.clear();
        self.ping_sent_ms = None;
        if info.clean_session {
            self.incoming_qos2.clear();
        }

        self.encode(|buf| connect.write(buf))?;
        self.flush().await?;

        let deadline = Instant::now() + timeout;
        let connack = match self.read_packet(deadline).await? {
            Some(Packet::ConnAck(connack)) => connack,
            Some(other) => {
                warn!(packet = ?other, "Expected CONNACK");
                return Err(MqttStatus::BadResponse);
            }
            None => {
                warn!(timeout_ms = timeout.as_millis() as u64, "CONNACK not received");
                return Err(MqttStatus::NoDataAvailable);
            }
        };

        if connack.code != ConnectReturnCode::Success {
            warn!(code = ?connack.code, "Broker refused connection");
            return Err(MqttStatus::ServerRefused);
        }

        self.connected = true;
        self.keep_alive_ms = u64::from(connect.keep_alive) * 1000;
        debug!(
            client_id = %info.client_id,
            session_present = connack.session_present,
            "CONNACK received"
        );
        Ok(connack.session_present)
    }

    async fn subscribe(
        &mut self,
        subscriptions: &[SubscribeInfo],
        packet_id: u16,
    ) -> Result<(), MqttStatus> {
        if subscriptions.is_empty() || packet_id == 0 {
            return Err(MqttStatus::BadParameter);
        }
        self.ensure_connected()?;

        let subscribe = Subscribe {
            pkid: packet_id,
            filters: subscriptions
                .iter()
                .map(|s| SubscribeFilter::new(s.filter.clone(), s.qos))
                .collect(),
        };
        self.encode(|buf| subscribe.write(buf))?;
        self.flush().await
    }

    async fn unsubscribe(&mut self, filters: &[String], packet_id: u16) -> Result<(), MqttStatus> {
        if filters.is_empty() || packet_id == 0 {
            return Err(MqttStatus::BadParameter);
        }
        self.ensure_connected()?;

        let unsubscribe = Unsubscribe {
            pkid: packet_id,
            topics: filters.to_vec(),
        };
        self.encode(|buf| unsubscribe.write(buf))?;
        self.flush().await
    }

    async fn publish(&mut self, publish: &PublishInfo, packet_id: u16) -> Result<(), MqttStatus> {
        if publish.requires_ack() && packet_id == 0 {
            return Err(MqttStatus::BadParameter);
        }
        self.ensure_connected()?;

        let packet = Publish {
            dup: publish.dup,
            qos: publish.qos,
            retain: publish.retain,
            topic: publish.topic.clone(),
            pkid: if publish.requires_ack() { packet_id } else { 0 },
            payload: publish.payload.clone(),
        };
        self.encode(|buf| packet.write(buf))?;
        self.flush().await
    }

    async fn release(&mut self, packet_id: u16) -> Result<(), MqttStatus> {
        if packet_id == 0 {
            return Err(MqttStatus::BadParameter);
        }
        self.ensure_connected()?;

        self.encode(|buf| PubRel::new(packet_id).write(buf))?;
        self.flush().await
    }

    async fn ping(&mut self) -> Result<(), MqttStatus> {
        self.ensure_connected()?;

        self.encode(|buf| PingReq.write(buf))?;
        self.flush().await?;
        if self.ping_sent_ms.is_none() {
            self.ping_sent_ms = Some(self.clock.now_ms());
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttStatus> {
        self.ensure_connected()?;

        self.encode(|buf| Disconnect.write(buf))?;
        let sent = self.flush().await;
        self.connected = false;
        if let Err(error) = self.stream.shutdown().await {
            debug!(%error, "Transport shutdown failed after DISCONNECT");
        }
        sent
    }

    async fn process_loop(&mut self, timeout: Duration) -> Result<Vec<IncomingPacket>, MqttStatus> {
        self.ensure_connected()?;

        let deadline = Instant::now() + timeout;
        let mut packets = Vec::new();
        while let Some(packet) = self.read_packet(deadline).await? {
            if let Some(incoming) = self.handle_packet(packet).await? {
                packets.push(incoming);
            }
        }

        self.manage_keep_alive().await?;
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
