// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Subscription handling and retained message replay.

use bytes::Bytes;
use std::sync::Arc;

use mqtt_session::config::SessionConfig;
use mqtt_session::packet::{
    ApplicationMessage, ConnectPacket, DisconnectPacket, Packet, SubscribeAck, SubscribePacket,
    SubscribeTopic, UnsubscribePacket,
};
use mqtt_session::session::Session;
use mqtt_session::types::{QoS, SessionStatus};

mod common;
use common::{MockAdapter, MockRegistry};

fn retained(topic: &str, qos: QoS, payload: &'static str) -> ApplicationMessage {
    let mut message = ApplicationMessage::new(topic, qos, Bytes::from_static(payload.as_bytes()));
    message.set_retain(true);
    message
}

#[tokio::test]
async fn test_subscribe_replays_retained() {
    common::init_logs();
    let registry = MockRegistry::new();
    registry.add_retained(retained("sensors/a", QoS::AtMostOnce, "42"));

    let session = Arc::new(Session::new(
        "A",
        SessionConfig::default(),
        registry.clone(),
    ));
    let (adapter, script) = MockAdapter::new();
    let handle = tokio::spawn(Arc::clone(&session).run(ConnectPacket::new("A"), adapter.clone()));

    script.feed(Packet::Subscribe(SubscribePacket::new(
        10,
        vec![SubscribeTopic::new("sensors/+", QoS::AtLeastOnce)],
    )));

    let sent = adapter.wait_for_sent(2).await;
    match &sent[0] {
        Packet::SubscribeAck(ack) => {
            assert_eq!(ack.packet_id(), 10);
            assert_eq!(ack.acknowledgements(), &[SubscribeAck::QoS(QoS::AtLeastOnce)]);
        }
        other => panic!("expected suback, got {other:?}"),
    }
    match &sent[1] {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic(), "sensors/a");
            // min(granted 1, retained 0) = 0, so no packet id.
            assert_eq!(publish.qos(), QoS::AtMostOnce);
            assert_eq!(publish.packet_id(), None);
            assert_eq!(publish.payload().as_ref(), b"42");
            assert!(publish.retain());
        }
        other => panic!("expected publish, got {other:?}"),
    }

    script.feed(Packet::Disconnect(DisconnectPacket::new()));
    assert!(handle.await.unwrap());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    common::init_logs();
    let registry = MockRegistry::new();
    let session = Arc::new(Session::new(
        "A",
        SessionConfig::default(),
        registry.clone(),
    ));
    let (adapter, script) = MockAdapter::new();
    let handle = tokio::spawn(Arc::clone(&session).run(ConnectPacket::new("A"), adapter.clone()));

    script.feed(Packet::Subscribe(SubscribePacket::new(
        1,
        vec![SubscribeTopic::new("t", QoS::AtMostOnce)],
    )));
    adapter.wait_for_sent(1).await;

    script.feed(Packet::Unsubscribe(UnsubscribePacket::new(
        2,
        vec!["t".to_string()],
    )));
    let sent = adapter.wait_for_sent(2).await;
    match &sent[1] {
        Packet::UnsubscribeAck(ack) => assert_eq!(ack.packet_id(), 2),
        other => panic!("expected unsuback, got {other:?}"),
    }

    // Fan-out no longer matches.
    session.enqueue_application_message(
        Some("peer"),
        ApplicationMessage::new("t", QoS::AtMostOnce, Bytes::from_static(b"x")),
    );
    let mut status = SessionStatus::default();
    session.fill_status(&mut status);
    assert_eq!(status.pending_messages_count, 0);

    script.feed(Packet::Disconnect(DisconnectPacket::new()));
    assert!(handle.await.unwrap());
}

#[tokio::test]
async fn test_server_initiated_subscribe_replays_retained() {
    common::init_logs();
    let registry = MockRegistry::new();
    registry.add_retained(retained("sensors/a", QoS::AtMostOnce, "42"));

    let session = Arc::new(Session::new(
        "A",
        SessionConfig::default(),
        registry.clone(),
    ));
    let acks = session
        .subscribe(&[SubscribeTopic::new("sensors/#", QoS::AtMostOnce)])
        .await;
    assert_eq!(acks, vec![SubscribeAck::QoS(QoS::AtMostOnce)]);

    // The replayed message waits in the pending queue for the next
    // connection.
    let mut status = SessionStatus::default();
    session.fill_status(&mut status);
    assert_eq!(status.pending_messages_count, 1);
}

#[tokio::test]
async fn test_interceptor_close_connection_stops_session() {
    common::init_logs();
    let registry = MockRegistry::new();
    let mut config = SessionConfig::default();
    config.set_subscription_interceptor(|request| {
        if request.topic == "forbidden" {
            request.accept = false;
            request.close_connection = true;
        }
    });

    let session = Arc::new(Session::new("A", config, registry.clone()));
    let (adapter, script) = MockAdapter::new();
    let handle = tokio::spawn(Arc::clone(&session).run(ConnectPacket::new("A"), adapter.clone()));

    script.feed(Packet::Subscribe(SubscribePacket::new(
        3,
        vec![SubscribeTopic::new("forbidden", QoS::AtMostOnce)],
    )));

    // The SUBACK with the failure code still goes out first.
    let sent = adapter.wait_for_sent(1).await;
    match &sent[0] {
        Packet::SubscribeAck(ack) => {
            assert_eq!(ack.acknowledgements(), &[SubscribeAck::Failed]);
        }
        other => panic!("expected suback, got {other:?}"),
    }
    assert!(!handle.await.unwrap());
    drop(script);
}
