// src/connection/handler.rs

//! Defines `Connection`, which owns one client socket and runs its read and
//! write loops.

use super::guard::{ConnectionGuard, ConnectionParts, Lifecycle};
use super::properties::{Properties, PropertyValue};
use super::transport::{BoxedReader, BoxedWriter, Inbound};
use crate::core::RiftError;
use crate::core::bus::encode_payload;
use crate::core::dispatcher::Request;
use crate::core::protocol::Message;
use crate::core::state::ServerState;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A single client connection.
///
/// A connection is created idle with its socket halves, registered, and then
/// driven by [`Connection::open`]. Both loops share one cancellation token;
/// whichever side fails first cancels it, and `open` finalizes the
/// connection once both loops have returned.
pub struct Connection {
    id: u64,
    state: Arc<ServerState>,
    cancel: CancellationToken,
    outbound_tx: mpsc::Sender<Bytes>,
    lifecycle: Mutex<Lifecycle>,
    properties: Properties,
}

impl Connection {
    /// Creates an idle connection. `id` must be non-zero and unique for the
    /// lifetime of the server.
    pub fn new(
        id: u64,
        state: Arc<ServerState>,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(state.config.send_queue_len.max(1));
        Arc::new(Self {
            id,
            state,
            cancel: CancellationToken::new(),
            outbound_tx,
            lifecycle: Mutex::new(Lifecycle::Idle(Box::new(ConnectionParts {
                reader,
                writer,
                outbound_rx,
            }))),
            properties: Properties::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Returns true once the connection has been cancelled or finalized.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || matches!(*self.lifecycle.lock(), Lifecycle::Closed)
    }

    /// Waits until the connection has been cancelled.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Requests the connection to stop. Idempotent.
    ///
    /// Finalization itself runs on the task driving [`Connection::open`].
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Connection {} cancelled.", self.id);
        }
        self.cancel.cancel();
    }

    /// Flips the lifecycle to `Closed`. Returns false if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(*lifecycle, Lifecycle::Closed) {
            return false;
        }
        *lifecycle = Lifecycle::Closed;
        true
    }

    /// Queues an already-encoded frame for the write loop.
    ///
    /// Waits while the outbound queue is full. A waiting send is released with
    /// `ConnectionClosed` as soon as the connection is cancelled.
    pub async fn send(&self, payload: Bytes) -> Result<(), RiftError> {
        if self.is_closed() {
            return Err(RiftError::ConnectionClosed(self.id));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RiftError::ConnectionClosed(self.id)),
            res = self.outbound_tx.send(payload) => {
                res.map_err(|_| RiftError::ConnectionClosed(self.id))
            }
        }
    }

    /// Encodes `message` with the server codec and queues it.
    pub async fn send_message(&self, message: &Message) -> Result<(), RiftError> {
        let frame = self.state.codec.encode(message)?;
        self.send(frame).await
    }

    /// Publishes `message` on the forward channel, tagged with this
    /// connection's id so a remote instance can route replies back here.
    ///
    /// Returns the number of bus subscribers that received it.
    pub async fn send_forward(&self, message: Message) -> Result<usize, RiftError> {
        let bus = self.state.bus.as_ref().ok_or(RiftError::DistributionDisabled)?;
        let frame = self.state.codec.encode(&message.with_source_conn_id(self.id))?;
        bus.publish(
            &self.state.config.distribute.forward_channel,
            encode_payload(&frame),
        )
        .await
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Stores an attribute, returning the previous value under `key`.
    pub fn set_property(
        &self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.properties.set(key, value)
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.get(key)
    }

    pub fn remove_property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.remove(key)
    }

    /// Runs the connection until it is closed.
    ///
    /// The on-open hook runs before any loop starts; if it fails the
    /// connection is discarded and `HookRejected` is returned. Otherwise this
    /// returns after both loops stopped and finalization completed.
    pub async fn open(self: &Arc<Self>) -> Result<(), RiftError> {
        let parts = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Active) {
                Lifecycle::Idle(parts) => *parts,
                other => {
                    *lifecycle = other;
                    return Err(RiftError::AlreadyOpen(self.id));
                }
            }
        };
        let guard = ConnectionGuard::new(self.clone());
        let ConnectionParts {
            reader,
            writer,
            outbound_rx,
        } = parts;

        if self.cancel.is_cancelled() {
            guard
                .finalize(Some(reader), Some(writer), Some(outbound_rx), false)
                .await;
            return Ok(());
        }

        if let Err(e) = self.state.hooks.call_on_open(self) {
            warn!("on-open hook rejected connection {}: {}", self.id, e);
            self.cancel.cancel();
            guard
                .finalize(Some(reader), Some(writer), Some(outbound_rx), false)
                .await;
            return Err(RiftError::HookRejected {
                id: self.id,
                reason: e.to_string(),
            });
        }

        info!("Connection {} opened.", self.id);
        let read_task = tokio::spawn(read_loop(self.clone(), reader));
        let write_task = tokio::spawn(write_loop(self.clone(), writer, outbound_rx));

        self.cancel.cancelled().await;

        let reader = match read_task.await {
            Ok(reader) => Some(reader),
            Err(e) => {
                error!("Read loop of connection {} failed: {}", self.id, e);
                None
            }
        };
        let (writer, outbound_rx) = match write_task.await {
            Ok((writer, rx)) => (Some(writer), Some(rx)),
            Err(e) => {
                error!("Write loop of connection {} failed: {}", self.id, e);
                (None, None)
            }
        };

        guard.finalize(reader, writer, outbound_rx, true).await;
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Reads frames until the socket fails, the read deadline passes, or the
/// connection is cancelled.
async fn read_loop(conn: Arc<Connection>, mut reader: BoxedReader) -> BoxedReader {
    // A returning or panicking loop takes the whole connection down.
    let _cancel_on_exit = conn.cancel.clone().drop_guard();
    let pong_wait = conn.state.config.keepalive.pong_wait();

    loop {
        let next = tokio::select! {
            biased;
            _ = conn.cancel.cancelled() => break,
            res = timeout(pong_wait, reader.read_frame()) => res,
        };

        let frame = match next {
            Ok(Ok(Some(Inbound::Data(frame)))) => frame,
            Ok(Ok(Some(Inbound::Heartbeat))) => continue,
            Ok(Ok(None)) => {
                debug!("Connection {} closed by peer.", conn.id);
                break;
            }
            Ok(Err(e)) => {
                if e.is_normal_disconnect() {
                    debug!("Connection {} closed by peer: {}", conn.id, e);
                } else {
                    warn!("Read error on connection {}: {}", conn.id, e);
                }
                break;
            }
            Err(_) => {
                info!(
                    "Connection {} sent nothing within {:?}, closing.",
                    conn.id, pong_wait
                );
                break;
            }
        };

        let message = match conn.state.codec.decode(&frame, false) {
            Ok(message) => message,
            Err(e) => {
                warn!("Connection {}: dropping frame: {}", conn.id, e);
                continue;
            }
        };

        let request = Request::new(conn.clone(), message);
        tokio::select! {
            biased;
            _ = conn.cancel.cancelled() => break,
            _ = conn.state.dispatcher.dispatch(request) => {}
        }
    }
    reader
}

/// Drains the outbound queue and sends keep-alive pings until a write fails
/// or the connection is cancelled.
async fn write_loop(
    conn: Arc<Connection>,
    mut writer: BoxedWriter,
    mut outbound_rx: mpsc::Receiver<Bytes>,
) -> (BoxedWriter, mpsc::Receiver<Bytes>) {
    let _cancel_on_exit = conn.cancel.clone().drop_guard();
    let keepalive = &conn.state.config.keepalive;
    let write_wait = keepalive.write_wait();
    let period = keepalive.ping_period().max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let (op, result) = tokio::select! {
            biased;
            _ = conn.cancel.cancelled() => break,
            payload = outbound_rx.recv() => {
                let Some(payload) = payload else { break };
                ("write", timeout(write_wait, writer.write_frame(payload)).await)
            }
            _ = ticker.tick() => ("ping", timeout(write_wait, writer.ping()).await),
        };

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if e.is_normal_disconnect() {
                    debug!("Connection {} {} stopped: {}", conn.id, op, e);
                } else {
                    warn!("{} failed on connection {}: {}", op, conn.id, e);
                }
                break;
            }
            Err(_) => {
                warn!(
                    "{} on connection {} exceeded the {:?} write deadline",
                    op, conn.id, write_wait
                );
                break;
            }
        }
    }
    (writer, outbound_rx)
}
