// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use async_trait::async_trait;
use bytes::Bytes;
use riftline::config::Config;
use riftline::connection::{BoxedReader, BoxedWriter, Connection, FrameReader, FrameWriter, Inbound};
use riftline::core::RiftError;
use riftline::core::dispatcher::Request;
use riftline::core::protocol::Message;
use riftline::core::state::ServerState;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Sets up minimal tracing for tests (ignores the error if already initialized).
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A default config with the worker pool disabled.
pub fn test_config() -> Config {
    init_tracing();
    Config::default()
}

/// Reader half driven by the test through `MockPeer::inbound`.
/// Dropping the sender looks like the peer closing the socket.
struct MockReader {
    rx: mpsc::Receiver<Result<Inbound, RiftError>>,
}

#[async_trait]
impl FrameReader for MockReader {
    async fn read_frame(&mut self) -> Result<Option<Inbound>, RiftError> {
        match self.rx.recv().await {
            Some(Ok(inbound)) => Ok(Some(inbound)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Writer half that records everything written to it.
struct MockWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    closes: Arc<AtomicUsize>,
    pings: Arc<AtomicUsize>,
    fail_writes: bool,
}

#[async_trait]
impl FrameWriter for MockWriter {
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), RiftError> {
        if self.fail_writes {
            return Err(RiftError::WebSocket("broken pipe".into()));
        }
        let _ = self.tx.send(payload);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), RiftError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RiftError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The test's side of a mock socket.
pub struct MockPeer {
    pub inbound: mpsc::Sender<Result<Inbound, RiftError>>,
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
    pub closes: Arc<AtomicUsize>,
    pub pings: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockPeer {
    /// Sends one data frame from the client side.
    pub async fn send_frame(&self, frame: impl Into<Bytes>) {
        self.inbound
            .send(Ok(Inbound::Data(frame.into())))
            .await
            .expect("reader gone");
    }

    /// Waits for the next frame written by the server.
    pub async fn next_written(&mut self) -> Option<Bytes> {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub fn mock_transport() -> (BoxedReader, BoxedWriter, MockPeer) {
    build_transport(false)
}

/// A transport whose every write fails.
#[allow(dead_code)]
pub fn failing_transport() -> (BoxedReader, BoxedWriter, MockPeer) {
    build_transport(true)
}

fn build_transport(fail_writes: bool) -> (BoxedReader, BoxedWriter, MockPeer) {
    let (in_tx, in_rx) = mpsc::channel(64);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    let pings = Arc::new(AtomicUsize::new(0));
    let reader = Box::new(MockReader { rx: in_rx });
    let writer = Box::new(MockWriter {
        tx: out_tx,
        closes: closes.clone(),
        pings: pings.clone(),
        fail_writes,
    });
    let peer = MockPeer {
        inbound: in_tx,
        outbound: out_rx,
        closes,
        pings,
    };
    (reader, writer, peer)
}

/// Creates a connection over a mock transport. It is neither registered nor opened.
#[allow(dead_code)]
pub fn mock_connection(state: &Arc<ServerState>, id: u64) -> (Arc<Connection>, MockPeer) {
    let (reader, writer, peer) = mock_transport();
    (Connection::new(id, state.clone(), reader, writer), peer)
}

/// Builds a request for `conn` without going through a socket.
#[allow(dead_code)]
pub fn request(conn: &Arc<Connection>, msg_type: u32, data: &'static str) -> Request {
    Request::new(conn.clone(), Message::new(msg_type, data))
}

/// Polls `condition` every few milliseconds for up to two seconds.
#[allow(dead_code)]
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Awaits `fut` for up to two seconds, panicking on timeout.
#[allow(dead_code)]
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("operation timed out")
}
