// tests/integration/distribute_test.rs

//! Cross-instance redirection through a shared in-process bus.

use super::test_helpers::{mock_transport, test_config, wait_until, within};
use async_trait::async_trait;
use futures::StreamExt;
use riftline::Server;
use riftline::core::RiftError;
use riftline::core::bus::{MemoryBus, PubSubBus, Subscription, decode_payload, encode_payload};
use riftline::core::protocol::Message;
use riftline::server::DistributeState;
use std::sync::Arc;
use std::time::Duration;

/// Two servers attached to one bus, both with distribution running.
async fn cluster() -> (Arc<MemoryBus>, Server, Server) {
    let bus = Arc::new(MemoryBus::new());
    let a = Server::with_bus(test_config(), bus.clone());
    let b = Server::with_bus(test_config(), bus.clone());
    a.enable_distribution().await.unwrap();
    b.enable_distribution().await.unwrap();
    (bus, a, b)
}

/// A bus that is never reachable.
struct DownBus;

#[async_trait]
impl PubSubBus for DownBus {
    async fn ping(&self) -> Result<(), RiftError> {
        Err(RiftError::Bus("connection refused".into()))
    }

    async fn publish(&self, _channel: &str, _payload: String) -> Result<usize, RiftError> {
        Err(RiftError::Bus("connection refused".into()))
    }

    async fn subscribe(&self, _channel: &str) -> Result<Subscription, RiftError> {
        Err(RiftError::Bus("connection refused".into()))
    }
}

#[tokio::test]
async fn test_enable_distribution_runs_and_is_idempotent() {
    let (bus, a, b) = cluster().await;
    assert_eq!(a.distribute_state(), DistributeState::Running);
    assert_eq!(b.distribute_state(), DistributeState::Running);
    assert_eq!(bus.subscriber_count("world_channel"), 2);

    a.enable_distribution().await.unwrap();
    assert_eq!(bus.subscriber_count("world_channel"), 2);
}

#[tokio::test]
async fn test_world_message_reaches_connection_on_other_instance() {
    let (_bus, a, b) = cluster().await;
    let (reader, writer, mut peer) = mock_transport();
    b.accept(42, reader, writer).unwrap();

    let receivers = a.publish_world(42, Message::new(3, "from a")).await.unwrap();
    assert_eq!(receivers, 2);

    let written = peer.next_written().await.unwrap();
    // Delivered frames use the client layout, without the connection id.
    let msg = b.state().codec.decode(&written, false).unwrap();
    assert_eq!(msg.msg_type(), 3);
    assert_eq!(msg.data().as_ref(), b"from a");
    assert_eq!(msg.source_conn_id(), None);
}

#[tokio::test]
async fn test_unknown_target_is_dropped() {
    let (_bus, a, b) = cluster().await;
    let (reader, writer, mut peer) = mock_transport();
    let conn = b.accept(42, reader, writer).unwrap();

    a.publish_world(999, Message::new(3, "nobody")).await.unwrap();
    a.publish_world(42, Message::new(3, "after")).await.unwrap();

    let written = peer.next_written().await.unwrap();
    let msg = b.state().codec.decode(&written, false).unwrap();
    assert_eq!(msg.data().as_ref(), b"after");
    assert!(!conn.is_closed());
    assert_eq!(a.distribute_state(), DistributeState::Running);
}

#[tokio::test]
async fn test_bad_payloads_are_skipped() {
    let (bus, a, b) = cluster().await;
    let (reader, writer, mut peer) = mock_transport();
    b.accept(7, reader, writer).unwrap();

    bus.publish("world_channel", "%%% not base64 %%%".into())
        .await
        .unwrap();
    bus.publish("world_channel", encode_payload(&[1, 2, 3]))
        .await
        .unwrap();
    a.publish_world(7, Message::new(1, "still here")).await.unwrap();

    let written = peer.next_written().await.unwrap();
    let msg = b.state().codec.decode(&written, false).unwrap();
    assert_eq!(msg.data().as_ref(), b"still here");
}

#[tokio::test]
async fn test_send_forward_publishes_with_source_id() {
    let bus = Arc::new(MemoryBus::new());
    let server = Server::with_bus(test_config(), bus.clone());
    let mut forwarded = bus.subscribe("forward_channel").await.unwrap();

    let (reader, writer, _peer) = mock_transport();
    let conn = server.accept(21, reader, writer).unwrap();
    let receivers = conn.send_forward(Message::new(9, "to backend")).await.unwrap();
    assert_eq!(receivers, 1);

    let payload = within(forwarded.next()).await.unwrap().unwrap();
    let frame = decode_payload(&payload).unwrap();
    let msg = server.state().codec.decode(&frame, true).unwrap();
    assert_eq!(msg.source_conn_id(), Some(21));
    assert_eq!(msg.msg_type(), 9);
    assert_eq!(msg.data().as_ref(), b"to backend");
}

#[tokio::test]
async fn test_distribution_requires_a_bus() {
    let server = Server::new(test_config());
    let err = server.enable_distribution().await.unwrap_err();
    assert!(matches!(err, RiftError::DistributionDisabled));
    let err = server
        .publish_world(1, Message::new(1, "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, RiftError::DistributionDisabled));
    assert_eq!(server.distribute_state(), DistributeState::Disabled);
}

#[tokio::test]
async fn test_unreachable_bus_leaves_distribution_disabled() {
    let server = Server::with_bus(test_config(), Arc::new(DownBus));
    let err = server.enable_distribution().await.unwrap_err();
    assert!(matches!(err, RiftError::Bus(_)));
    assert_eq!(server.distribute_state(), DistributeState::Disabled);
}

#[tokio::test]
async fn test_stop_closes_connections_and_rejects_new_ones() {
    let (_bus, a, b) = cluster().await;
    let (reader, writer, peer) = mock_transport();
    let conn = b.accept(5, reader, writer).unwrap();

    b.stop();
    assert!(conn.is_closed());
    assert_eq!(b.connection_count(), 0);
    assert!(wait_until(|| peer.close_count() == 1).await);

    let (reader, writer, _peer) = mock_transport();
    let err = b.accept(6, reader, writer).unwrap_err();
    assert!(matches!(err, RiftError::RegistryClosed));

    // Publishing to the stopped instance's connection is a silent drop.
    a.publish_world(5, Message::new(1, "late")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(a.distribute_state(), DistributeState::Running);
}
