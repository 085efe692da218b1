//! MqttContext against an in-process fake broker
//!
//! Tests focus on what goes over the wire and what the context hands back to
//! the agent, using rumqttc's codec on the broker side of a duplex stream.

mod test_helpers;

use mqtt_agent::agent::completion_channel;
use mqtt_agent::agent::MqttAgent;
use mqtt_agent::protocol::{
    ConnectInfo, IncomingPacket, MqttStatus, ProtocolClient, PublishInfo, QoS, SubscribeInfo,
    SystemClock,
};
use mqtt_agent::testing::ManualClock;
use mqtt_agent::transport::mqtt::{MqttContext, PINGRESP_TIMEOUT_MS};
use mqtt_agent::AgentExit;
use rumqttc::mqttbytes::v4::{
    ConnectReturnCode, Packet, PingResp, PubAck, PubComp, PubRec, PubRel, Publish, SubAck,
    SubscribeReasonCode, UnsubAck,
};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;
use tokio::io::DuplexStream;

const SHORT: Duration = Duration::from_millis(50);

async fn connected(session_present: bool) -> (MqttContext<DuplexStream>, FakeBroker) {
    let (mut context, mut broker) = context_pair(1024, SystemClock::shared());
    let info = ConnectInfo::new("ctx-test");

    let (result, _) = tokio::join!(
        context.connect(&info, None, Duration::from_secs(1)),
        broker.accept(ConnectReturnCode::Success, session_present)
    );

    assert_eq!(result, Ok(session_present));
    (context, broker)
}

// ===== Tests for CONNECT =====

#[tokio::test]
async fn test_connect_sends_connect_parameters() {
    let (mut context, mut broker) = context_pair(1024, SystemClock::shared());
    let info = ConnectInfo::new("device-7")
        .with_keep_alive(Duration::from_secs(30))
        .with_clean_session(false)
        .with_credentials("user", "pass");
    let will = PublishInfo::new("devices/7/status", QoS::AtLeastOnce, "offline").with_retain(true);

    let (result, connect) = tokio::join!(
        context.connect(&info, Some(&will), Duration::from_secs(1)),
        broker.accept(ConnectReturnCode::Success, true)
    );

    assert_eq!(result, Ok(true));
    assert!(context.is_connected());
    assert_eq!(connect.client_id, "device-7");
    assert_eq!(connect.keep_alive, 30);
    assert!(!connect.clean_session);

    let login = connect.login.expect("credentials should be sent");
    assert_eq!(login.username, "user");
    assert_eq!(login.password, "pass");

    let last_will = connect.last_will.expect("will should be sent");
    assert_eq!(last_will.topic, "devices/7/status");
    assert_eq!(&last_will.message[..], b"offline");
    assert!(last_will.retain);
}

#[tokio::test]
async fn test_connect_refused_by_broker() {
    let (mut context, mut broker) = context_pair(1024, SystemClock::shared());

    let connect_info = ConnectInfo::new("c");
    let (result, _) = tokio::join!(
        context.connect(&connect_info, None, Duration::from_secs(1)),
        broker.accept(ConnectReturnCode::NotAuthorized, false)
    );

    assert_eq!(result, Err(MqttStatus::ServerRefused));
    assert!(!context.is_connected());
}

#[tokio::test]
async fn test_connect_times_out_without_connack() {
    let (mut context, mut broker) = context_pair(1024, SystemClock::shared());

    let connect_info = ConnectInfo::new("c");
    let (result, packet) = tokio::join!(
        context.connect(&connect_info, None, SHORT),
        broker.recv()
    );

    assert!(matches!(packet, Packet::Connect(_)));
    assert_eq!(result, Err(MqttStatus::NoDataAvailable));
}

#[tokio::test]
async fn test_connect_broker_closes_before_connack() {
    let (mut context, mut broker) = context_pair(1024, SystemClock::shared());

    let broker_task = async move {
        broker.recv().await;
        broker.close();
    };
    let connect_info = ConnectInfo::new("c");
    let (result, _) = tokio::join!(
        context.connect(&connect_info, None, Duration::from_secs(1)),
        broker_task
    );

    assert_eq!(result, Err(MqttStatus::RecvFailed));
}

#[tokio::test]
async fn test_connect_unexpected_packet_is_bad_response() {
    let (mut context, mut broker) = context_pair(1024, SystemClock::shared());

    let broker_task = async {
        broker.recv().await;
        broker.send(|buf| UnsubAck::new(1).write(buf)).await;
    };
    let connect_info = ConnectInfo::new("c");
    let (result, _) = tokio::join!(
        context.connect(&connect_info, None, Duration::from_secs(1)),
        broker_task
    );

    assert_eq!(result, Err(MqttStatus::BadResponse));
}

// ===== Tests for outgoing publishes =====

#[tokio::test]
async fn test_qos0_publish_has_no_packet_id() {
    let (mut context, mut broker) = connected(false).await;

    context
        .publish(&PublishInfo::new("a/b", QoS::AtMostOnce, "hi"), 0)
        .await
        .unwrap();

    match broker.recv().await {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic, "a/b");
            assert_eq!(publish.qos, QoS::AtMostOnce);
            assert_eq!(publish.pkid, 0);
            assert_eq!(&publish.payload[..], b"hi");
        }
        other => panic!("expected PUBLISH, got {other:?}"),
    }
}

#[tokio::test]
async fn test_qos1_publish_acknowledged() {
    let (mut context, mut broker) = connected(false).await;
    let packet_id = context.next_packet_id();

    context
        .publish(&PublishInfo::new("a/b", QoS::AtLeastOnce, "x"), packet_id)
        .await
        .unwrap();
    match broker.recv().await {
        Packet::Publish(publish) => assert_eq!(publish.pkid, packet_id),
        other => panic!("expected PUBLISH, got {other:?}"),
    }
    broker.send(|buf| PubAck::new(packet_id).write(buf)).await;

    let packets = context.process_loop(SHORT).await.unwrap();

    assert_eq!(packets, vec![IncomingPacket::PubAck(packet_id)]);
}

#[tokio::test]
async fn test_resent_publish_carries_dup_flag() {
    let (mut context, mut broker) = connected(true).await;
    let publish = PublishInfo::new("a/b", QoS::AtLeastOnce, "x").as_duplicate();

    context.publish(&publish, 42).await.unwrap();

    match broker.recv().await {
        Packet::Publish(sent) => {
            assert!(sent.dup);
            assert_eq!(sent.pkid, 42);
        }
        other => panic!("expected PUBLISH, got {other:?}"),
    }
}

#[tokio::test]
async fn test_qos2_publish_handshake() {
    let (mut context, mut broker) = connected(false).await;

    context
        .publish(&PublishInfo::new("a/b", QoS::ExactlyOnce, "x"), 5)
        .await
        .unwrap();
    assert!(matches!(broker.recv().await, Packet::Publish(_)));

    broker.send(|buf| PubRec::new(5).write(buf)).await;
    let packets = context.process_loop(SHORT).await.unwrap();
    assert_eq!(packets, vec![IncomingPacket::PubRec(5)]);
    assert_eq!(broker.recv().await, Packet::PubRel(PubRel::new(5)));

    broker.send(|buf| PubComp::new(5).write(buf)).await;
    let packets = context.process_loop(SHORT).await.unwrap();
    assert_eq!(packets, vec![IncomingPacket::PubComp(5)]);
}

#[tokio::test]
async fn test_publish_larger_than_buffer_is_no_memory() {
    let (mut context, _broker) = connected(false).await;
    let payload = vec![b'x'; 2048];

    let result = context
        .publish(&PublishInfo::new("big", QoS::AtMostOnce, payload), 0)
        .await;

    assert_eq!(result, Err(MqttStatus::NoMemory));
    assert!(context.is_connected());
}

// ===== Tests for incoming packets =====

#[tokio::test]
async fn test_incoming_qos1_publish_is_acked_and_delivered() {
    let (mut context, mut broker) = connected(false).await;
    let mut incoming = Publish::new("sensors/1/temp", QoS::AtLeastOnce, "21.5");
    incoming.pkid = 9;

    broker.send(|buf| incoming.write(buf)).await;
    let packets = context.process_loop(SHORT).await.unwrap();

    match packets.as_slice() {
        [IncomingPacket::Publish(publish)] => {
            assert_eq!(publish.topic, "sensors/1/temp");
            assert_eq!(publish.packet_id, 9);
            assert_eq!(&publish.payload[..], b"21.5");
        }
        other => panic!("expected one publish, got {other:?}"),
    }
    assert_eq!(broker.recv().await, Packet::PubAck(PubAck::new(9)));
}

#[tokio::test]
async fn test_incoming_qos2_publish_delivered_once() {
    let (mut context, mut broker) = connected(false).await;
    let mut incoming = Publish::new("cmd/reboot", QoS::ExactlyOnce, "now");
    incoming.pkid = 3;

    broker.send(|buf| incoming.write(buf)).await;
    let first = context.process_loop(SHORT).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(broker.recv().await, Packet::PubRec(PubRec::new(3)));

    incoming.dup = true;
    broker.send(|buf| incoming.write(buf)).await;
    let duplicate = context.process_loop(SHORT).await.unwrap();
    assert!(duplicate.is_empty());
    assert_eq!(broker.recv().await, Packet::PubRec(PubRec::new(3)));

    broker.send(|buf| PubRel::new(3).write(buf)).await;
    let released = context.process_loop(SHORT).await.unwrap();
    assert!(released.is_empty());
    assert_eq!(broker.recv().await, Packet::PubComp(PubComp::new(3)));
}

#[tokio::test]
async fn test_suback_reports_granted_qos() {
    let (mut context, mut broker) = connected(false).await;
    let subscriptions = vec![
        SubscribeInfo::new("a/#", QoS::AtLeastOnce),
        SubscribeInfo::new("secret/#", QoS::AtLeastOnce),
    ];

    context.subscribe(&subscriptions, 11).await.unwrap();
    match broker.recv().await {
        Packet::Subscribe(subscribe) => {
            assert_eq!(subscribe.pkid, 11);
            assert_eq!(subscribe.filters.len(), 2);
            assert_eq!(subscribe.filters[0].path, "a/#");
        }
        other => panic!("expected SUBSCRIBE, got {other:?}"),
    }
    broker
        .send(|buf| {
            SubAck::new(
                11,
                vec![
                    SubscribeReasonCode::Success(QoS::AtMostOnce),
                    SubscribeReasonCode::Failure,
                ],
            )
            .write(buf)
        })
        .await;

    let packets = context.process_loop(SHORT).await.unwrap();

    assert_eq!(
        packets,
        vec![IncomingPacket::SubAck {
            packet_id: 11,
            granted: vec![Some(QoS::AtMostOnce), None],
        }]
    );
}

#[tokio::test]
async fn test_unsubscribe_round_trip() {
    let (mut context, mut broker) = connected(false).await;

    context
        .unsubscribe(&["a/#".to_string()], 12)
        .await
        .unwrap();
    match broker.recv().await {
        Packet::Unsubscribe(unsubscribe) => {
            assert_eq!(unsubscribe.pkid, 12);
            assert_eq!(unsubscribe.topics, vec!["a/#".to_string()]);
        }
        other => panic!("expected UNSUBSCRIBE, got {other:?}"),
    }
    broker.send(|buf| UnsubAck::new(12).write(buf)).await;

    let packets = context.process_loop(SHORT).await.unwrap();
    assert_eq!(packets, vec![IncomingPacket::UnsubAck(12)]);
}

#[tokio::test]
async fn test_process_loop_without_data_returns_nothing() {
    let (mut context, _broker) = connected(false).await;

    let packets = context.process_loop(Duration::ZERO).await.unwrap();

    assert!(packets.is_empty());
}

#[tokio::test]
async fn test_broker_close_is_recv_failed() {
    let (mut context, broker) = connected(false).await;
    broker.close();

    let result = context.process_loop(SHORT).await;

    assert_eq!(result, Err(MqttStatus::RecvFailed));
    assert!(result.unwrap_err().is_connection_fatal());
}

#[tokio::test]
async fn test_unexpected_packet_is_bad_response() {
    let (mut context, mut broker) = connected(false).await;

    broker
        .send(|buf| {
            rumqttc::mqttbytes::v4::ConnAck::new(ConnectReturnCode::Success, false).write(buf)
        })
        .await;

    assert_eq!(
        context.process_loop(SHORT).await,
        Err(MqttStatus::BadResponse)
    );
}

// ===== Tests for keep-alive =====

async fn connected_with_clock(clock: &ManualClock) -> (MqttContext<DuplexStream>, FakeBroker) {
    let (mut context, mut broker) = context_pair(1024, clock.shared());
    let info = ConnectInfo::new("keepalive").with_keep_alive(Duration::from_secs(10));

    let (result, _) = tokio::join!(
        context.connect(&info, None, Duration::from_secs(1)),
        broker.accept(ConnectReturnCode::Success, false)
    );
    result.unwrap();
    (context, broker)
}

#[tokio::test]
async fn test_idle_connection_sends_pingreq() {
    let clock = ManualClock::new();
    let (mut context, mut broker) = connected_with_clock(&clock).await;

    context.process_loop(Duration::ZERO).await.unwrap();
    assert!(!context.awaiting_ping_response());

    clock.advance(Duration::from_secs(10));
    context.process_loop(Duration::ZERO).await.unwrap();

    assert!(context.awaiting_ping_response());
    assert_eq!(broker.recv().await, Packet::PingReq);

    broker.send(|buf| PingResp.write(buf)).await;
    let packets = context.process_loop(SHORT).await.unwrap();
    assert_eq!(packets, vec![IncomingPacket::PingResp]);
    assert!(!context.awaiting_ping_response());
}

#[tokio::test]
async fn test_missing_pingresp_is_keep_alive_timeout() {
    let clock = ManualClock::new();
    let (mut context, mut broker) = connected_with_clock(&clock).await;

    clock.advance(Duration::from_secs(10));
    context.process_loop(Duration::ZERO).await.unwrap();
    assert_eq!(broker.recv().await, Packet::PingReq);

    clock.advance(Duration::from_millis(PINGRESP_TIMEOUT_MS));
    let result = context.process_loop(Duration::ZERO).await;

    assert_eq!(result, Err(MqttStatus::KeepAliveTimeout));
}

#[tokio::test]
async fn test_outgoing_traffic_defers_pingreq() {
    let clock = ManualClock::new();
    let (mut context, _broker) = connected_with_clock(&clock).await;

    clock.advance(Duration::from_secs(8));
    context
        .publish(&PublishInfo::new("a", QoS::AtMostOnce, "x"), 0)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(8));
    context.process_loop(Duration::ZERO).await.unwrap();

    assert!(!context.awaiting_ping_response());
}

// ===== Tests for the agent over a real context =====

#[tokio::test]
async fn test_agent_end_to_end_over_fake_broker() {
    let (network, mut broker) = network_pair(1024);
    let mut agent: MqttAgent<MqttContext<DuplexStream>> = MqttAgent::new(&test_agent_section());
    agent
        .initialize(H0, network, SystemClock::shared(), noop_callback())
        .unwrap();

    let broker_task = tokio::spawn(async move {
        broker.accept(ConnectReturnCode::Success, false).await;

        let mut received = Vec::new();
        while let Some(packet) = broker.try_recv().await {
            match &packet {
                Packet::Subscribe(subscribe) => {
                    let pkid = subscribe.pkid;
                    broker
                        .send(|buf| {
                            SubAck::new(pkid, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)])
                                .write(buf)
                        })
                        .await;
                }
                Packet::Publish(publish) => {
                    let pkid = publish.pkid;
                    broker.send(|buf| PubAck::new(pkid).write(buf)).await;
                    let mut forward = Publish::new("sensors/7/temp", QoS::AtMostOnce, "19.0");
                    forward.pkid = 0;
                    broker.send(|buf| forward.write(buf)).await;
                }
                _ => {}
            }
            let done = packet == Packet::Disconnect;
            received.push(packet);
            if done {
                break;
            }
        }
        received
    });

    let session_present = agent
        .connect(H0, &ConnectInfo::new("e2e"), None, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(!session_present);

    let handle = agent.handle();
    let loop_task = tokio::spawn(async move {
        let exit = agent.run().await;
        (agent, exit)
    });

    let (delivered_tx, mut delivered_rx) = tokio::sync::mpsc::unbounded_channel();
    let on_publish: mqtt_agent::connection::PublishCallback =
        Arc::new(move |publish: &PublishInfo| {
            let _ = delivered_tx.send(publish.topic.clone());
        });

    handle
        .process_loop(H0, Some(Duration::from_millis(10)), None)
        .await
        .unwrap();

    let (callback, subscribed) = completion_channel();
    handle
        .subscribe(
            H0,
            SubscribeInfo::new("sensors/+/temp", QoS::AtLeastOnce),
            on_publish,
            callback,
        )
        .await
        .unwrap();
    assert!(subscribed.await.unwrap().is_ok());

    let (callback, published) = completion_channel();
    handle
        .publish(
            H0,
            PublishInfo::new("out/status", QoS::AtLeastOnce, "online"),
            callback,
        )
        .await
        .unwrap();
    assert!(published.await.unwrap().is_ok());

    let topic = tokio::time::timeout(Duration::from_secs(5), delivered_rx.recv())
        .await
        .expect("incoming publish not routed")
        .unwrap();
    assert_eq!(topic, "sensors/7/temp");

    handle.disconnect(H0, None).await.unwrap();
    handle.terminate().await.unwrap();

    let (agent, exit) = loop_task.await.unwrap();
    assert_eq!(exit, AgentExit::Terminated);

    let slot = agent.connection(H0).unwrap();
    assert!(slot.pending_acks.is_empty());
    assert!(!slot.connected);
    assert!(slot.subscriptions.contains("sensors/+/temp"));

    let received = broker_task.await.unwrap();
    assert!(matches!(received.first(), Some(Packet::Subscribe(_))));
    assert_eq!(received.last(), Some(&Packet::Disconnect));
}

#[tokio::test]
async fn test_agent_loop_exits_on_broker_close() {
    let (network, mut broker) = network_pair(1024);
    let mut agent: MqttAgent<MqttContext<DuplexStream>> = MqttAgent::new(&test_agent_section());
    agent
        .initialize(H0, network, SystemClock::shared(), noop_callback())
        .unwrap();

    let connect_info = ConnectInfo::new("fatal");
    let (connected, _) = tokio::join!(
        agent.connect(H0, &connect_info, None, Duration::from_secs(1)),
        broker.accept(ConnectReturnCode::Success, false)
    );
    connected.unwrap();

    agent
        .handle()
        .process_loop(H0, Some(Duration::from_millis(10)), None)
        .await
        .unwrap();
    broker.close();

    let exit = tokio::time::timeout(Duration::from_secs(5), agent.run())
        .await
        .expect("loop should stop on a closed transport");

    assert_eq!(
        exit,
        AgentExit::Fatal {
            handle: H0,
            status: MqttStatus::RecvFailed,
        }
    );
    assert!(!agent.is_serviced(H0));
}
