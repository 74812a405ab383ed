// src/core/protocol/codec.rs

//! Implements the binary frame codec.
//!
//! A frame is laid out as
//!
//! ```text
//! [source_conn_id: u64]?   only on bus-redirected frames
//! [type: u32]?             if include_type_field
//! [length: u32]?           if include_length_field, otherwise inferred
//! payload: [u8; length]
//! ```
//!
//! Every multi-byte field uses the configured byte order. Whether the leading
//! connection id is present is decided by the caller, never by the frame.

use super::message::Message;
use crate::config::{ByteOrder, Config};
use crate::core::RiftError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

const CONN_ID_LEN: usize = 8;
const TYPE_LEN: usize = 4;
const LENGTH_LEN: usize = 4;

/// Frame shape and limits shared by every frame of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    pub include_type_field: bool,
    pub include_length_field: bool,
    pub byte_order: ByteOrder,
    /// Maximum payload length in bytes. `0` disables the check.
    pub max_package_size: u32,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            include_type_field: true,
            include_length_field: true,
            byte_order: ByteOrder::Little,
            max_package_size: 4096,
        }
    }
}

impl From<&Config> for CodecOptions {
    fn from(config: &Config) -> Self {
        Self {
            include_type_field: config.message.include_type_field,
            include_length_field: config.message.include_length_field,
            byte_order: config.message.byte_order,
            max_package_size: config.max_package_size,
        }
    }
}

/// Encodes and decodes [`Message`]s according to a fixed [`CodecOptions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec {
    options: CodecOptions,
}

impl MessageCodec {
    pub fn new(options: CodecOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Length of the type and length header for direct client frames.
    pub fn head_len(&self) -> usize {
        let mut len = 0;
        if self.options.include_type_field {
            len += TYPE_LEN;
        }
        if self.options.include_length_field {
            len += LENGTH_LEN;
        }
        len
    }

    /// Encodes a message into a freshly allocated frame.
    pub fn encode(&self, message: &Message) -> Result<Bytes, RiftError> {
        let mut dst = BytesMut::with_capacity(CONN_ID_LEN + self.head_len() + message.data_len());
        self.encode_into(message, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Decodes one complete frame.
    ///
    /// `expect_source_id` must be `true` for frames received through the bus
    /// and `false` for frames received directly from a client.
    pub fn decode(&self, frame: &[u8], expect_source_id: bool) -> Result<Message, RiftError> {
        let mut buf = frame;

        let source_conn_id = if expect_source_id {
            ensure_remaining(buf, CONN_ID_LEN, "source connection id")?;
            Some(self.get_u64(&mut buf))
        } else {
            None
        };

        let msg_type = if self.options.include_type_field {
            ensure_remaining(buf, TYPE_LEN, "type")?;
            self.get_u32(&mut buf)
        } else {
            0
        };

        let length = if self.options.include_length_field {
            ensure_remaining(buf, LENGTH_LEN, "length")?;
            self.get_u32(&mut buf) as usize
        } else {
            buf.remaining()
        };

        self.check_size(length)?;
        ensure_remaining(buf, length, "payload")?;

        let mut message = Message::new(msg_type, Bytes::copy_from_slice(&buf[..length]));
        if let Some(id) = source_conn_id {
            message.set_source_conn_id(id);
        }
        Ok(message)
    }

    fn encode_into(&self, message: &Message, dst: &mut BytesMut) -> Result<(), RiftError> {
        let length = message.data_len();
        self.check_size(length)?;
        let length_field =
            u32::try_from(length).map_err(|_| RiftError::PayloadLengthOverflow(length))?;

        if let Some(id) = message.source_conn_id() {
            match self.options.byte_order {
                ByteOrder::Little => dst.put_u64_le(id),
                ByteOrder::Big => dst.put_u64(id),
            }
        }
        if self.options.include_type_field {
            self.put_u32(dst, message.msg_type());
        }
        if self.options.include_length_field {
            self.put_u32(dst, length_field);
        }
        dst.extend_from_slice(message.data());
        Ok(())
    }

    fn check_size(&self, length: usize) -> Result<(), RiftError> {
        let limit = self.options.max_package_size;
        if limit > 0 && length > limit as usize {
            return Err(RiftError::PayloadTooLarge { length, limit });
        }
        Ok(())
    }

    fn put_u32(&self, dst: &mut BytesMut, value: u32) {
        match self.options.byte_order {
            ByteOrder::Little => dst.put_u32_le(value),
            ByteOrder::Big => dst.put_u32(value),
        }
    }

    fn get_u32(&self, buf: &mut &[u8]) -> u32 {
        match self.options.byte_order {
            ByteOrder::Little => buf.get_u32_le(),
            ByteOrder::Big => buf.get_u32(),
        }
    }

    fn get_u64(&self, buf: &mut &[u8]) -> u64 {
        match self.options.byte_order {
            ByteOrder::Little => buf.get_u64_le(),
            ByteOrder::Big => buf.get_u64(),
        }
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = RiftError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_into(item, dst)
    }
}

fn ensure_remaining(buf: &[u8], needed: usize, field: &'static str) -> Result<(), RiftError> {
    if buf.len() < needed {
        return Err(RiftError::Truncated {
            field,
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}
