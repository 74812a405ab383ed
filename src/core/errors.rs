// src/core/errors.rs

//! Defines the primary error type for the messaging engine.

use std::sync::Arc;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// The main error enum, representing all failures surfaced by the engine.
///
/// The variants fall into the same groups the engine reacts to differently:
/// transport errors close a connection, framing errors drop a single frame,
/// configuration errors are returned to the caller during setup.
#[derive(Error, Debug, Clone)]
pub enum RiftError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("WebSocket Error: {0}")]
    WebSocket(String),

    /// Text format was configured but the outbound frame is not valid UTF-8.
    #[error("frame cannot be sent as text: {0}")]
    InvalidText(#[from] std::str::Utf8Error),

    // --- Framing errors ---
    /// The frame ended before a header field or the payload was complete.
    #[error("truncated frame: {field} needs {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// The declared or inferred payload length exceeds `max_package_size`.
    #[error("data length [{length}] beyond max package size limit [{limit}]")]
    PayloadTooLarge { length: usize, limit: u32 },

    /// The payload cannot be described by a 32-bit length field.
    #[error("payload of {0} bytes does not fit a 32-bit length field")]
    PayloadLengthOverflow(usize),

    // --- Connection lifecycle errors ---
    #[error("connection [{0}] has closed")]
    ConnectionClosed(u64),

    #[error("connection [{0}] is already open")]
    AlreadyOpen(u64),

    #[error("connection [{0}] not found")]
    ConnectionNotFound(u64),

    #[error("connection registry is closed")]
    RegistryClosed,

    #[error("on-open hook rejected connection [{id}]: {reason}")]
    HookRejected { id: u64, reason: String },

    // --- Dispatch configuration errors ---
    #[error("packageType [{0}] has been added")]
    DuplicateRouter(u32),

    #[error("worker pool has already been started")]
    WorkPoolAlreadyStarted,

    // --- Distribution errors ---
    #[error("distribution is disabled")]
    DistributionDisabled,

    #[error("Bus Error: {0}")]
    Bus(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    // --- RESP client errors ---
    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for RiftError {
    fn from(e: std::io::Error) -> Self {
        RiftError::Io(Arc::new(e))
    }
}

impl From<tungstenite::Error> for RiftError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Io(io) => RiftError::Io(Arc::new(io)),
            other => RiftError::WebSocket(other.to_string()),
        }
    }
}

impl RiftError {
    /// Returns true for errors that only invalidate the current frame.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            RiftError::Truncated { .. }
                | RiftError::PayloadTooLarge { .. }
                | RiftError::PayloadLengthOverflow(_)
        )
    }

    /// Returns true when an I/O error is an ordinary peer disconnect.
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            RiftError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            RiftError::ConnectionClosed(_) => true,
            _ => false,
        }
    }
}
