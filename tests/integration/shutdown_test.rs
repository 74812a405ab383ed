// tests/integration/shutdown_test.rs

//! Graceful shutdown must finalize every connection before it returns, so
//! the runtime can be dropped right afterwards.

use super::test_helpers::{mock_transport, test_config, wait_until};
use riftline::Server;
use riftline::core::RiftError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_shutdown_finalizes_connections_before_runtime_drop() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let server = Server::new(test_config());
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    {
        let opened = opened.clone();
        server.set_on_conn_open(move |_conn| {
            opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let closed = closed.clone();
        server.set_on_conn_close(move |_conn| {
            closed.fetch_add(1, Ordering::SeqCst);
        });
    }

    let peers = rt.block_on(async {
        let mut peers = Vec::new();
        for id in 1..=3 {
            let (reader, writer, peer) = mock_transport();
            server.accept(id, reader, writer).unwrap();
            peers.push(peer);
        }
        assert!(wait_until(|| opened.load(Ordering::SeqCst) == 3).await);
        assert!(server.shutdown(Duration::from_secs(2)).await);
        peers
    });
    drop(rt);

    assert_eq!(closed.load(Ordering::SeqCst), 3);
    assert!(peers.iter().all(|peer| peer.close_count() == 1));
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_shutdown_without_connections_and_later_accepts() {
    let server = Server::new(test_config());
    assert!(server.shutdown(Duration::from_millis(100)).await);

    let (reader, writer, _peer) = mock_transport();
    let err = server.accept(1, reader, writer).unwrap_err();
    assert!(matches!(err, RiftError::RegistryClosed));
}
