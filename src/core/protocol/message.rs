// src/core/protocol/message.rs

//! Defines the in-memory form of a single wire frame.

use bytes::Bytes;

/// A decoded (or to-be-encoded) message.
///
/// The payload is opaque to the engine; only `msg_type` is interpreted, to
/// select the router bound to it. `source_conn_id` is present only on frames
/// that travel through the pub/sub bus and names the connection the frame is
/// ultimately addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    msg_type: u32,
    data: Bytes,
    source_conn_id: Option<u64>,
}

impl Message {
    /// Creates a message with the given type tag and payload.
    pub fn new(msg_type: u32, data: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            data: data.into(),
            source_conn_id: None,
        }
    }

    pub fn msg_type(&self) -> u32 {
        self.msg_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The payload length as it would be written in the length field.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn source_conn_id(&self) -> Option<u64> {
        self.source_conn_id
    }

    pub fn set_msg_type(&mut self, msg_type: u32) {
        self.msg_type = msg_type;
    }

    pub fn set_data(&mut self, data: impl Into<Bytes>) {
        self.data = data.into();
    }

    /// Sets the connection id embedded in bus-redirected frames.
    /// An id of `0` clears it, since `0` is never a valid connection id.
    pub fn set_source_conn_id(&mut self, id: u64) {
        self.source_conn_id = (id > 0).then_some(id);
    }

    /// Builder-style variant of [`Message::set_source_conn_id`].
    pub fn with_source_conn_id(mut self, id: u64) -> Self {
        self.set_source_conn_id(id);
        self
    }

    /// Drops the source connection id, turning a redirected message back into
    /// a direct client message.
    pub fn without_source_conn_id(mut self) -> Self {
        self.source_conn_id = None;
        self
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}
