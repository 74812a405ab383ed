// src/server/distribute.rs

//! Cross-instance redirection.
//!
//! A frame published on the world channel carries the id of the connection it
//! is addressed to. Every instance subscribes to the channel; the instance
//! that holds the connection delivers the frame, all others drop it.

use crate::core::RiftError;
use crate::core::bus::{Subscription, decode_payload};
use crate::core::state::ServerState;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the queue between the subscriber loop and the redirect loop.
pub(crate) const REDIRECT_QUEUE_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributeState {
    /// No bus probe has succeeded yet.
    Disabled,
    /// The bus answered the probe; loops are being started.
    Enabled,
    /// The subscriber and redirect loops are running.
    Running,
}

/// Receives world-channel payloads, decodes their base64 text and feeds the
/// resulting frames to the redirect loop.
pub(crate) async fn subscriber_loop(
    mut subscription: Subscription,
    frames: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
) {
    info!("World channel subscriber started.");
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = subscription.next() => item,
        };

        let payload = match item {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                warn!("World channel subscription failed: {}", e);
                break;
            }
            None => {
                warn!("World channel subscription ended.");
                break;
            }
        };

        let frame = match decode_payload(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping world channel payload that is not base64: {}", e);
                continue;
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            res = frames.send(frame) => {
                if res.is_err() {
                    break;
                }
            }
        }
    }
    info!("World channel subscriber stopped.");
}

/// Delivers redirected frames to the local connection they are addressed to.
pub(crate) async fn redirect_loop(
    state: Arc<ServerState>,
    mut frames: mpsc::Receiver<Bytes>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        match redirect_frame(&state, &frame).await {
            Ok(()) => {}
            Err(e) if e.is_framing() => warn!("Dropping malformed redirected frame: {}", e),
            Err(e) => debug!("Redirected frame not delivered: {}", e),
        }
    }
    debug!("Redirect loop stopped.");
}

/// Decodes one redirected frame and queues it on the addressed connection,
/// without the leading connection id.
pub(crate) async fn redirect_frame(state: &ServerState, frame: &[u8]) -> Result<(), RiftError> {
    let message = state.codec.decode(frame, true)?;
    let target = message
        .source_conn_id()
        .ok_or(RiftError::ConnectionNotFound(0))?;
    let conn = state.registry.get(target)?;
    conn.send_message(&message.without_source_conn_id()).await
}
