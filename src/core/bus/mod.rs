// src/core/bus/mod.rs

//! The channel-addressed publish/subscribe bus used to redirect frames
//! between server instances.
//!
//! Frames are binary, bus payloads are text, so every frame crosses the bus
//! base64-encoded.

mod memory;
mod resp;

pub use memory::MemoryBus;
pub use resp::{RespBus, RespClient};

use crate::core::RiftError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures::stream::BoxStream;

/// A stream of text payloads received on one channel.
pub type Subscription = BoxStream<'static, Result<String, RiftError>>;

#[async_trait]
pub trait PubSubBus: Send + Sync + 'static {
    /// Checks that the bus is reachable.
    async fn ping(&self) -> Result<(), RiftError>;

    /// Publishes `payload` on `channel`, returning the number of subscribers
    /// that received it.
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, RiftError>;

    /// Subscribes to `channel`. The stream ends when the subscription is lost.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, RiftError>;
}

pub fn encode_payload(frame: &[u8]) -> String {
    STANDARD.encode(frame)
}

pub fn decode_payload(payload: &str) -> Result<Bytes, RiftError> {
    Ok(Bytes::from(STANDARD.decode(payload)?))
}
