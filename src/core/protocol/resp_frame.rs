// src/core/protocol/resp_frame.rs

//! The subset of RESP (REdis Serialization Protocol) needed to talk to a
//! Redis-compatible pub/sub bus, with a `tokio_util` `Encoder`/`Decoder`.

use crate::core::RiftError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

// Limits for replies coming back from the bus.
const MAX_ARRAY_ELEMENTS: usize = 1_024;
const MAX_BULK_STRING_SIZE: usize = 64 * 1024 * 1024;
const MAX_DEPTH: usize = 8;

/// A single RESP value exchanged with the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds a command array from its textual parts, e.g. `["PUBLISH", "ch", "msg"]`.
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        RespFrame::Array(
            parts
                .into_iter()
                .map(|p| RespFrame::BulkString(p.into()))
                .collect(),
        )
    }

    /// Returns the frame as UTF-8 text if it is a simple or bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespFrame::SimpleString(s) => Some(s.clone()),
            RespFrame::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}

/// Stateless RESP codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = RiftError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst);
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = RiftError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut cursor = &src[..];
        match read_frame(&mut cursor, 0) {
            Ok(frame) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            // Wait for more bytes from the socket.
            Err(RiftError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn write_frame(frame: &RespFrame, dst: &mut BytesMut) {
    match frame {
        RespFrame::SimpleString(s) => write_line(dst, b'+', s.as_bytes()),
        RespFrame::Error(s) => write_line(dst, b'-', s.as_bytes()),
        RespFrame::Integer(i) => write_line(dst, b':', i.to_string().as_bytes()),
        RespFrame::BulkString(b) => {
            write_line(dst, b'$', b.len().to_string().as_bytes());
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespFrame::Array(items) => {
            write_line(dst, b'*', items.len().to_string().as_bytes());
            for item in items {
                write_frame(item, dst);
            }
        }
    }
}

fn write_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.extend_from_slice(&[prefix]);
    dst.extend_from_slice(body);
    dst.extend_from_slice(CRLF);
}

fn read_frame(cursor: &mut &[u8], depth: usize) -> Result<RespFrame, RiftError> {
    if depth > MAX_DEPTH {
        return Err(RiftError::Protocol("RESP nesting too deep".into()));
    }
    let current = *cursor;
    let Some((&prefix, rest)) = current.split_first() else {
        return Err(RiftError::IncompleteData);
    };
    *cursor = rest;
    let line = read_line(cursor)?;

    match prefix {
        b'+' => Ok(RespFrame::SimpleString(
            String::from_utf8_lossy(line).into_owned(),
        )),
        b'-' => Ok(RespFrame::Error(String::from_utf8_lossy(line).into_owned())),
        b':' => Ok(RespFrame::Integer(parse_int(line)?)),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(RespFrame::Null);
            }
            let len = len as usize;
            if len > MAX_BULK_STRING_SIZE {
                return Err(RiftError::Protocol(format!("bulk string of {len} bytes")));
            }
            if cursor.len() < len + CRLF.len() {
                return Err(RiftError::IncompleteData);
            }
            if &cursor[len..len + CRLF.len()] != CRLF {
                return Err(RiftError::Protocol("bulk string not CRLF terminated".into()));
            }
            let data = Bytes::copy_from_slice(&cursor[..len]);
            *cursor = &cursor[len + CRLF.len()..];
            Ok(RespFrame::BulkString(data))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(RespFrame::Null);
            }
            let len = len as usize;
            if len > MAX_ARRAY_ELEMENTS {
                return Err(RiftError::Protocol(format!("array of {len} elements")));
            }
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(read_frame(cursor, depth + 1)?);
            }
            Ok(RespFrame::Array(items))
        }
        other => Err(RiftError::Protocol(format!(
            "unexpected RESP type byte 0x{other:02x}"
        ))),
    }
}

fn read_line<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8], RiftError> {
    let current: &'a [u8] = *cursor;
    let pos = current
        .windows(CRLF.len())
        .position(|w| w == CRLF)
        .ok_or(RiftError::IncompleteData)?;
    *cursor = &current[pos + CRLF.len()..];
    Ok(&current[..pos])
}

fn parse_int(line: &[u8]) -> Result<i64, RiftError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RiftError::Protocol("invalid RESP integer".into()))
}
