// src/connection/transport.rs

//! The socket seam of a connection.
//!
//! A connection owns one socket split into a read half and a write half so the
//! read loop and the write loop can run as independent tasks. The WebSocket
//! adapter wraps a raw, already-upgraded byte stream handed over by the HTTP
//! layer.

use crate::config::MessageFormat;
use crate::core::RiftError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::Role;

/// What the read half produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One complete frame for the codec.
    Data(Bytes),
    /// A keep-alive control frame. It carries no data but proves the peer is alive.
    Heartbeat,
}

/// The read half of a socket.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Reads the next inbound item. `Ok(None)` means the peer closed the socket.
    async fn read_frame(&mut self) -> Result<Option<Inbound>, RiftError>;
}

/// The write half of a socket.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), RiftError>;

    async fn ping(&mut self) -> Result<(), RiftError>;

    /// Closes the socket. Called exactly once, by connection finalization.
    async fn close(&mut self) -> Result<(), RiftError>;
}

pub type BoxedReader = Box<dyn FrameReader>;
pub type BoxedWriter = Box<dyn FrameWriter>;

/// Read half of a WebSocket connection.
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// Write half of a WebSocket connection.
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
    format: MessageFormat,
}

/// Splits an established WebSocket stream into boxed connection halves.
pub fn websocket_halves<S>(
    ws: WebSocketStream<S>,
    format: MessageFormat,
) -> (BoxedReader, BoxedWriter)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (
        Box::new(WsReader { stream }),
        Box::new(WsWriter { sink, format }),
    )
}

/// Wraps a raw byte stream whose HTTP upgrade handshake already completed.
pub async fn from_raw_socket<S>(socket: S, format: MessageFormat) -> (BoxedReader, BoxedWriter)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = WebSocketStream::from_raw_socket(socket, Role::Server, None).await;
    websocket_halves(ws, format)
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<Option<Inbound>, RiftError> {
        while let Some(message) = self.stream.next().await {
            match message? {
                WsMessage::Binary(data) => return Ok(Some(Inbound::Data(data))),
                WsMessage::Text(text) => {
                    return Ok(Some(Inbound::Data(Bytes::copy_from_slice(text.as_bytes()))));
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => return Ok(Some(Inbound::Heartbeat)),
                WsMessage::Close(_) => return Ok(None),
                // Raw frames only exist on the write side.
                WsMessage::Frame(_) => {}
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), RiftError> {
        let message = match self.format {
            MessageFormat::Binary => WsMessage::Binary(payload),
            // Text frames must be sent byte for byte or not at all.
            MessageFormat::Text => WsMessage::Text(Utf8Bytes::try_from(payload)?),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), RiftError> {
        self.sink.send(WsMessage::Ping(Bytes::new())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RiftError> {
        self.sink.close().await?;
        Ok(())
    }
}
