// src/core/mod.rs

//! The central module containing the core logic and data structures of Riftline.

pub mod bus;
pub mod dispatcher;
pub mod errors;
pub mod id;
pub mod protocol;
pub mod registry;
pub mod state;

pub use errors::RiftError;
pub use protocol::{Message, MessageCodec};
