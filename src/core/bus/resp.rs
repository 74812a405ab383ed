// src/core/bus/resp.rs

//! A bus backed by a Redis-protocol server.

use super::{PubSubBus, Subscription};
use crate::config::DistributeConfig;
use crate::core::RiftError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A minimal RESP client: one TCP connection, one command at a time.
#[derive(Debug)]
pub struct RespClient {
    framed: Framed<TcpStream, RespFrameCodec>,
}

impl RespClient {
    /// Connects to `address` and authenticates if a password is given.
    pub async fn connect(address: &str, password: Option<&str>) -> Result<Self, RiftError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| RiftError::Bus(format!("connect to {address} timed out")))??;
        let mut client = Self {
            framed: Framed::new(stream, RespFrameCodec),
        };
        if let Some(password) = password {
            let reply = client
                .send_and_receive(RespFrame::command(["AUTH".to_string(), password.to_string()]))
                .await?;
            expect_ok(reply, "AUTH")?;
        }
        Ok(client)
    }

    /// Sends one command and waits for its reply.
    ///
    /// An error reply from the server is returned as `Ok(RespFrame::Error)`;
    /// only transport failures are `Err`.
    pub async fn send_and_receive(&mut self, frame: RespFrame) -> Result<RespFrame, RiftError> {
        self.framed.send(frame).await?;
        match timeout(READ_TIMEOUT, self.framed.next()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => Err(RiftError::Bus("connection closed by peer".into())),
            Err(_) => Err(RiftError::Bus(
                "read timeout while waiting for response".into(),
            )),
        }
    }

    /// Waits for the next pushed frame. `Ok(None)` means the server closed the connection.
    async fn next_push(&mut self) -> Result<Option<RespFrame>, RiftError> {
        self.framed.next().await.transpose()
    }
}

/// Publishes over a lazily opened, reused connection and subscribes over a
/// dedicated one per subscription.
pub struct RespBus {
    address: String,
    password: Option<String>,
    publisher: Mutex<Option<RespClient>>,
}

impl RespBus {
    pub fn new(address: impl Into<String>, password: Option<String>) -> Self {
        Self {
            address: address.into(),
            password,
            publisher: Mutex::new(None),
        }
    }

    pub fn from_config(config: &DistributeConfig) -> Self {
        Self::new(config.bus_address.clone(), config.password.clone())
    }

    async fn command(&self, frame: RespFrame) -> Result<RespFrame, RiftError> {
        let mut slot = self.publisher.lock().await;
        let mut client = match slot.take() {
            Some(client) => client,
            None => RespClient::connect(&self.address, self.password.as_deref()).await?,
        };
        match client.send_and_receive(frame).await {
            Ok(RespFrame::Error(e)) => {
                *slot = Some(client);
                Err(RiftError::Bus(e))
            }
            Ok(reply) => {
                *slot = Some(client);
                Ok(reply)
            }
            Err(e) => {
                debug!("Dropping bus connection to {}: {}", self.address, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PubSubBus for RespBus {
    async fn ping(&self) -> Result<(), RiftError> {
        match self.command(RespFrame::command(["PING"])).await? {
            RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("PONG") => Ok(()),
            other => Err(RiftError::Bus(format!("unexpected PING reply: {other:?}"))),
        }
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<usize, RiftError> {
        let frame = RespFrame::command(["PUBLISH".to_string(), channel.to_string(), payload]);
        match self.command(frame).await? {
            RespFrame::Integer(n) => Ok(n.max(0) as usize),
            other => Err(RiftError::Bus(format!("unexpected PUBLISH reply: {other:?}"))),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RiftError> {
        let mut client = RespClient::connect(&self.address, self.password.as_deref()).await?;
        let reply = client
            .send_and_receive(RespFrame::command(["SUBSCRIBE".to_string(), channel.to_string()]))
            .await?;
        if !is_push_of_kind(&reply, "subscribe") {
            return Err(RiftError::Bus(format!(
                "unexpected SUBSCRIBE reply: {reply:?}"
            )));
        }

        let channel = channel.to_string();
        let stream: Subscription = Box::pin(try_stream! {
            while let Some(frame) = client.next_push().await? {
                match message_payload(frame) {
                    Some(payload) => yield payload,
                    None => warn!("Ignoring non-message push on '{}'.", channel),
                }
            }
            debug!("Bus closed the subscription to '{}'.", channel);
        });
        Ok(stream)
    }
}

fn expect_ok(reply: RespFrame, command: &str) -> Result<(), RiftError> {
    match reply {
        RespFrame::SimpleString(s) if s == "OK" => Ok(()),
        RespFrame::Error(e) => Err(RiftError::Bus(format!("{command} rejected: {e}"))),
        other => Err(RiftError::Bus(format!(
            "unexpected {command} reply: {other:?}"
        ))),
    }
}

fn is_push_of_kind(frame: &RespFrame, kind: &str) -> bool {
    match frame {
        RespFrame::Array(items) => items
            .first()
            .and_then(RespFrame::as_text)
            .is_some_and(|k| k.eq_ignore_ascii_case(kind)),
        _ => false,
    }
}

/// Extracts the payload of a `["message", channel, payload]` push.
fn message_payload(frame: RespFrame) -> Option<String> {
    if !is_push_of_kind(&frame, "message") {
        return None;
    }
    match frame {
        RespFrame::Array(mut items) if items.len() == 3 => items.pop()?.as_text(),
        _ => None,
    }
}
