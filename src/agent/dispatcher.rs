//! The agent loop
//!
//! [`MqttAgent`] owns the connection table and is the only code that touches
//! it. Producers reach it through [`AgentHandle`]s; the loop drains the command
//! queue, runs each command against the protocol client of its connection, and
//! keeps every armed connection serviced between commands.

use super::command::{Command, CommandCallback, CommandKind, Operation};
use super::handle::AgentHandle;
use super::queue::{command_queue, CommandQueue, CommandSender, Dequeued};
use super::resumption;
use super::schedule::ServiceSchedule;
use crate::command_span;
use crate::config::AgentSection;
use crate::connection::{ConnectionHandle, ConnectionSlot, ConnectionTable, PublishCallback};
use crate::error::{AgentError, AgentResult};
use crate::observability::metrics::metrics;
use crate::protocol::{
    validate_topic_filter, validate_topic_name, Clock, ConnectInfo, IncomingPacket, MqttStatus,
    ProtocolClient, PublishInfo, SubscribeInfo,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// Why [`MqttAgent::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// A TERMINATE command was processed
    Terminated,
    /// Servicing a connection failed in a way the connection cannot recover
    /// from. The caller should reconnect the transport, [`MqttAgent::rebind`]
    /// it and connect again.
    Fatal {
        handle: ConnectionHandle,
        status: MqttStatus,
    },
}

/// Loop settings taken from the `[agent]` config section
#[derive(Debug, Clone)]
struct LoopSettings {
    queue_wait: Duration,
    process_loop_timeout: Duration,
    filter_max_len: usize,
}

/// The agent: connection table, command queue and servicing schedule
pub struct MqttAgent<C: ProtocolClient> {
    table: ConnectionTable<C>,
    queue: CommandQueue,
    sender: CommandSender,
    schedule: ServiceSchedule,
    settings: LoopSettings,
}

impl<C: ProtocolClient> MqttAgent<C> {
    pub fn new(config: &AgentSection) -> Self {
        let (sender, queue) = command_queue(
            config.queue_capacity,
            config.enqueue_policy,
            config.enqueue_block(),
        );

        Self {
            table: ConnectionTable::new(
                config.max_connections,
                config.pending_acks_max,
                config.subscriptions_max,
            ),
            queue,
            sender,
            schedule: ServiceSchedule::new(),
            settings: LoopSettings {
                queue_wait: config.queue_wait(),
                process_loop_timeout: config.process_loop_timeout(),
                filter_max_len: config.subscription_filter_max_len,
            },
        }
    }

    /// A new producer handle
    pub fn handle(&self) -> AgentHandle {
        AgentHandle::new(self.sender.clone())
    }

    /// Bind a transport to a free connection slot.
    ///
    /// `default_callback` receives every incoming publish that no subscription
    /// on this connection matches.
    pub fn initialize(
        &mut self,
        handle: ConnectionHandle,
        transport: C::Transport,
        clock: Arc<dyn Clock>,
        default_callback: PublishCallback,
    ) -> AgentResult<()> {
        self.table
            .allocate(handle, C::bind(transport, clock), default_callback)?;
        info!(handle = %handle, "Connection slot initialized");
        Ok(())
    }

    /// Swap in a fresh transport for an allocated slot, keeping its pending
    /// acknowledgments and subscriptions so the next connect can resume them.
    pub fn rebind(
        &mut self,
        handle: ConnectionHandle,
        transport: C::Transport,
        clock: Arc<dyn Clock>,
    ) -> AgentResult<()> {
        self.schedule.disarm(handle);
        let slot = self.table.resolve_mut(handle)?;
        slot.client = C::bind(transport, clock);
        slot.connected = false;
        info!(handle = %handle, "Transport rebound");
        Ok(())
    }

    /// Connect and resume the session, in the caller's context.
    ///
    /// Used before the loop starts or after it has returned; while it runs,
    /// use [`AgentHandle::connect`]. Returns the session-present flag.
    pub async fn connect(
        &mut self,
        handle: ConnectionHandle,
        info: &ConnectInfo,
        will: Option<&PublishInfo>,
        timeout: Duration,
    ) -> AgentResult<bool> {
        let slot = self.table.resolve_mut(handle)?;
        let span = crate::connection_span!(handle = %handle, client_id = %info.client_id);
        connect_slot(slot, handle, info, will, timeout)
            .instrument(span)
            .await
    }

    /// Run session resumption for a connected slot
    pub async fn resume_session(
        &mut self,
        handle: ConnectionHandle,
        session_present: bool,
    ) -> AgentResult<()> {
        let slot = self.table.resolve_mut(handle)?;
        resumption::resume_session(slot, handle, session_present).await
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Inspect a connection slot
    pub fn connection(&self, handle: ConnectionHandle) -> AgentResult<&ConnectionSlot<C>> {
        self.table.resolve(handle)
    }

    /// Whether `handle` is serviced between commands
    pub fn is_serviced(&self, handle: ConnectionHandle) -> bool {
        self.schedule.is_armed(handle)
    }

    /// Drain the command queue until TERMINATE or a fatal servicing error.
    ///
    /// Commands queued behind TERMINATE are not run; they stay queued until
    /// the loop is started again or the agent is dropped, in which case their
    /// callbacks never fire.
    pub async fn run(&mut self) -> AgentExit {
        let span = crate::agent_span!(connections = self.table.capacity());
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&mut self) -> AgentExit {
        info!("Agent loop started");
        metrics().set_loop_state("running");

        let exit = loop {
            match self.queue.dequeue(self.settings.queue_wait).await {
                Dequeued::Command(Command::Terminate) => {
                    info!(remaining = self.queue.depth(), "Terminate command received");
                    break AgentExit::Terminated;
                }
                Dequeued::Command(command) => {
                    if let Some(exit) = self.dispatch(command).await {
                        break exit;
                    }
                }
                Dequeued::TimedOut => {}
                Dequeued::Closed => {
                    warn!("All command senders dropped, stopping");
                    break AgentExit::Terminated;
                }
            }

            if let Some(exit) = self.service_next().await {
                break exit;
            }
        };

        match exit {
            AgentExit::Terminated => info!("Agent loop terminated"),
            AgentExit::Fatal { handle, status } => {
                error!(handle = %handle, error = %status, "Agent loop stopped on fatal connection error")
            }
        }
        metrics().set_loop_state("stopped");
        metrics().loop_exited(matches!(exit, AgentExit::Fatal { .. }));
        exit
    }

    async fn dispatch(&mut self, command: Command) -> Option<AgentExit> {
        let kind = command.kind();
        let started = Instant::now();

        match command {
            Command::Execute {
                handle,
                operation,
                callback,
            } => {
                let span = command_span!(kind = %kind, handle = %handle);
                let result = self.execute(handle, operation).instrument(span).await;
                let exit = self.fatal_exit(kind, handle, &result);

                metrics().command_dispatched(kind.as_str(), started.elapsed(), result.is_ok());
                complete(callback, handle, kind, result);
                exit
            }
            Command::Connect {
                handle,
                info,
                will,
                timeout,
                reply,
            } => {
                let result = self.connect(handle, &info, will.as_ref(), timeout).await;
                metrics().command_dispatched(kind.as_str(), started.elapsed(), result.is_ok());
                if reply.send(result).is_err() {
                    debug!(handle = %handle, "Connect caller stopped waiting");
                }
                None
            }
            Command::Terminate => Some(AgentExit::Terminated),
        }
    }

    /// A failed PROCESS_LOOP with a connection-fatal status ends the loop
    fn fatal_exit(
        &self,
        kind: CommandKind,
        handle: ConnectionHandle,
        result: &AgentResult<()>,
    ) -> Option<AgentExit> {
        match (kind, result) {
            (CommandKind::ProcessLoop, Err(AgentError::Protocol(status)))
                if status.is_connection_fatal() =>
            {
                Some(AgentExit::Fatal {
                    handle,
                    status: *status,
                })
            }
            _ => None,
        }
    }

    async fn execute(&mut self, handle: ConnectionHandle, operation: Operation) -> AgentResult<()> {
        match operation {
            Operation::Subscribe {
                subscription,
                callback,
            } => self.subscribe(handle, subscription, callback).await,
            Operation::Unsubscribe { filter } => self.unsubscribe(handle, &filter).await,
            Operation::Publish(publish) => self.publish(handle, publish).await,
            Operation::ProcessLoop { timeout } => {
                let timeout = timeout.unwrap_or(self.settings.process_loop_timeout);
                connected_slot(&mut self.table, handle)?;
                self.schedule.arm(handle, timeout);
                self.service(handle, timeout).await
            }
            Operation::Ping => {
                let slot = connected_slot(&mut self.table, handle)?;
                slot.client.ping().await?;
                Ok(())
            }
            Operation::Disconnect => {
                let slot = connected_slot(&mut self.table, handle)?;
                self.schedule.disarm(handle);
                slot.connected = false;
                metrics().mqtt_connection_closed();
                slot.client.disconnect().await?;
                info!(handle = %handle, "Disconnected");
                Ok(())
            }
            Operation::Free => {
                self.schedule.disarm(handle);
                drop(self.table.release(handle)?);
                info!(handle = %handle, "Connection slot freed");
                Ok(())
            }
        }
    }

    async fn subscribe(
        &mut self,
        handle: ConnectionHandle,
        subscription: SubscribeInfo,
        callback: PublishCallback,
    ) -> AgentResult<()> {
        let filter_max_len = self.settings.filter_max_len;
        let slot = connected_slot(&mut self.table, handle)?;

        validate_topic_filter(&subscription.filter, filter_max_len)?;
        slot.subscriptions.check_add(&subscription.filter)?;

        let packet_id = slot.next_packet_id()?;
        slot.client
            .subscribe(std::slice::from_ref(&subscription), packet_id)
            .await?;

        debug!(handle = %handle, filter = %subscription.filter, packet_id, "Subscribed");
        slot.subscriptions
            .add(subscription.filter, subscription.qos, callback)
    }

    async fn unsubscribe(&mut self, handle: ConnectionHandle, filter: &str) -> AgentResult<()> {
        let slot = connected_slot(&mut self.table, handle)?;
        if !slot.subscriptions.contains(filter) {
            return Err(AgentError::subscription_not_found(filter));
        }

        let packet_id = slot.next_packet_id()?;
        slot.client
            .unsubscribe(&[filter.to_string()], packet_id)
            .await?;

        debug!(handle = %handle, filter, packet_id, "Unsubscribed");
        slot.subscriptions.remove(filter).map(|_| ())
    }

    async fn publish(&mut self, handle: ConnectionHandle, publish: PublishInfo) -> AgentResult<()> {
        let slot = connected_slot(&mut self.table, handle)?;
        if validate_topic_name(&publish.topic).is_err() {
            return Err(MqttStatus::BadParameter.into());
        }

        if !publish.requires_ack() {
            let result = slot.client.publish(&publish, 0).await;
            return record_publish(result);
        }

        // Tracked before it reaches the transport so a resumed session can resend it
        let packet_id = slot.next_packet_id()?;
        slot.pending_acks.track(packet_id, publish.clone())?;

        let result = slot.client.publish(&publish, packet_id).await;
        if let Err(status) = result {
            if !status.may_have_been_sent() {
                slot.pending_acks.acknowledge(packet_id);
            }
        }
        debug!(handle = %handle, packet_id, topic = %publish.topic, "Publish sent");
        record_publish(result)
    }

    /// Run one service step for the next armed connection
    async fn service_next(&mut self) -> Option<AgentExit> {
        let (handle, timeout) = self.schedule.next_due()?;

        match self.service(handle, timeout).await {
            Ok(()) => None,
            Err(AgentError::Protocol(status)) if status.is_connection_fatal() => {
                Some(AgentExit::Fatal { handle, status })
            }
            Err(AgentError::InvalidHandle { .. }) | Err(AgentError::NotConnected { .. }) => {
                self.schedule.disarm(handle);
                None
            }
            Err(error) => {
                warn!(handle = %handle, error = %error, "Service step failed");
                None
            }
        }
    }

    /// Receive and route whatever the connection has for us
    async fn service(&mut self, handle: ConnectionHandle, timeout: Duration) -> AgentResult<()> {
        let slot = connected_slot(&mut self.table, handle)?;
        metrics().service_step();

        let packets = match slot.client.process_loop(timeout).await {
            Ok(packets) => packets,
            Err(MqttStatus::NoDataAvailable) => Vec::new(),
            Err(status) => {
                if status.is_connection_fatal() {
                    slot.connected = false;
                    self.schedule.disarm(handle);
                    metrics().mqtt_connection_closed();
                }
                return Err(status.into());
            }
        };

        for packet in packets {
            handle_incoming(slot, handle, packet);
        }
        Ok(())
    }
}

/// CONNECT followed by session resumption
async fn connect_slot<C: ProtocolClient>(
    slot: &mut ConnectionSlot<C>,
    handle: ConnectionHandle,
    info: &ConnectInfo,
    will: Option<&PublishInfo>,
    timeout: Duration,
) -> AgentResult<bool> {
    metrics().mqtt_connection_attempt();

    let session_present = match slot.client.connect(info, will, timeout).await {
        Ok(session_present) => session_present,
        Err(status) => {
            metrics().mqtt_connection_failed();
            warn!(handle = %handle, client_id = %info.client_id, error = %status, "Connect failed");
            return Err(status.into());
        }
    };

    if !slot.connected {
        metrics().mqtt_connection_established();
    }
    slot.connected = true;
    info!(
        handle = %handle,
        client_id = %info.client_id,
        session_present,
        "Connected to broker"
    );

    resumption::resume_session(slot, handle, session_present).await?;
    Ok(session_present)
}

fn connected_slot<C: ProtocolClient>(
    table: &mut ConnectionTable<C>,
    handle: ConnectionHandle,
) -> AgentResult<&mut ConnectionSlot<C>> {
    let slot = table.resolve_mut(handle)?;
    if !slot.connected {
        return Err(AgentError::NotConnected { handle });
    }
    Ok(slot)
}

fn handle_incoming<C>(slot: &mut ConnectionSlot<C>, handle: ConnectionHandle, packet: IncomingPacket) {
    match packet {
        IncomingPacket::Publish(publish) => {
            let matched = slot.deliver(&publish);
            metrics().mqtt_message_received(matched);
            debug!(handle = %handle, topic = %publish.topic, matched, "Incoming publish");
        }
        IncomingPacket::PubAck(packet_id) | IncomingPacket::PubComp(packet_id) => {
            if slot.pending_acks.acknowledge(packet_id).is_some() {
                metrics().mqtt_ack_received();
                debug!(handle = %handle, packet_id, "Publish acknowledged");
            }
        }
        IncomingPacket::PubRec(packet_id) => {
            if slot.pending_acks.mark_released(packet_id) {
                debug!(handle = %handle, packet_id, "Publish received by broker, awaiting PUBCOMP");
            }
        }
        IncomingPacket::SubAck { packet_id, granted } => {
            if granted.iter().any(Option::is_none) {
                warn!(handle = %handle, packet_id, "Broker refused a subscription");
            }
        }
        IncomingPacket::UnsubAck(packet_id) => {
            debug!(handle = %handle, packet_id, "Unsubscribe acknowledged");
        }
        IncomingPacket::PingResp => {
            debug!(handle = %handle, "Ping response");
        }
    }
}

fn record_publish(result: Result<(), MqttStatus>) -> AgentResult<()> {
    match result {
        Ok(()) => {
            metrics().mqtt_message_published();
            Ok(())
        }
        Err(status) => {
            metrics().mqtt_publish_failed();
            Err(status.into())
        }
    }
}

fn complete(
    callback: Option<CommandCallback>,
    handle: ConnectionHandle,
    kind: CommandKind,
    result: AgentResult<()>,
) {
    if let Err(error) = &result {
        warn!(handle = %handle, command = %kind, error = %error, "Command failed");
    }

    if let Some(callback) = callback {
        callback(result);
    }
}
