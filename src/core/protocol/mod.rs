// src/core/protocol/mod.rs

pub mod codec;
pub mod message;
pub mod resp_frame;

pub use codec::{CodecOptions, MessageCodec};
pub use message::Message;
pub use resp_frame::{RespFrame, RespFrameCodec};
