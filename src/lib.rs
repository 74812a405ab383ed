// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod server;

// Re-export
pub use crate::connection::Connection;
pub use crate::core::RiftError;
pub use crate::server::Server;
