// src/core/dispatcher/request.rs

use crate::connection::Connection;
use crate::core::RiftError;
use crate::core::protocol::Message;
use bytes::Bytes;
use std::sync::Arc;

/// A decoded message paired with the connection it arrived on.
#[derive(Debug, Clone)]
pub struct Request {
    conn: Arc<Connection>,
    msg: Message,
}

impl Request {
    pub fn new(conn: Arc<Connection>, msg: Message) -> Self {
        Self { conn, msg }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn conn_id(&self) -> u64 {
        self.conn.id()
    }

    pub fn message(&self) -> &Message {
        &self.msg
    }

    pub fn msg_type(&self) -> u32 {
        self.msg.msg_type()
    }

    pub fn data(&self) -> &Bytes {
        self.msg.data()
    }

    /// Encodes a reply and queues it on the originating connection.
    pub async fn reply(&self, msg_type: u32, data: impl Into<Bytes>) -> Result<(), RiftError> {
        self.conn.send_message(&Message::new(msg_type, data)).await
    }
}
