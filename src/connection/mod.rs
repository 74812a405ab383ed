// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: its socket halves,
//! its read and write loops, its outbound queue and its attributes.

mod guard;
mod handler;
mod properties;
pub mod transport;

pub use handler::Connection;
pub use properties::{Properties, PropertyValue};
pub use transport::{BoxedReader, BoxedWriter, FrameReader, FrameWriter, Inbound};
