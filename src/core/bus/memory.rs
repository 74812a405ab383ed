// src/core/bus/memory.rs

//! An in-process bus. Every server sharing one `MemoryBus` behaves like a
//! separate instance attached to the same broker.

use super::{PubSubBus, Subscription};
use crate::core::RiftError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

/// The capacity of each individual broadcast channel.
const CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Default)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |tx| tx.receiver_count())
    }
}

#[async_trait]
impl PubSubBus for MemoryBus {
    async fn ping(&self) -> Result<(), RiftError> {
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<usize, RiftError> {
        // A send with no live receivers is not an error for a pub/sub bus.
        Ok(self
            .channels
            .get(channel)
            .map_or(0, |tx| tx.send(payload).unwrap_or(0)))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RiftError> {
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let channel = channel.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let channel = channel.clone();
            async move {
                match item {
                    Ok(payload) => Some(Ok(payload)),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!("Subscriber on '{}' lagged, skipped {} messages.", channel, skipped);
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
