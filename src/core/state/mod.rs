// src/core/state/mod.rs

//! Defines the central `ServerState` struct, shared by every connection and
//! background task of one server.

mod hooks;

pub use hooks::{Hooks, OnCloseHook, OnOpenHook};

use crate::config::Config;
use crate::core::bus::PubSubBus;
use crate::core::dispatcher::Dispatcher;
use crate::core::protocol::{CodecOptions, MessageCodec};
use crate::core::registry::ConnectionRegistry;
use std::sync::Arc;

/// Shared, server-wide state. Wrapped in an `Arc` and handed to every
/// connection at construction time.
pub struct ServerState {
    /// The configuration the server was built with. Immutable after start.
    pub config: Config,
    /// Frame codec derived from `config`.
    pub codec: MessageCodec,
    pub registry: ConnectionRegistry,
    pub dispatcher: Dispatcher,
    pub hooks: Hooks,
    /// The pub/sub bus used for cross-instance redirection, if one is attached.
    pub bus: Option<Arc<dyn PubSubBus>>,
}

impl ServerState {
    pub fn new(config: Config, bus: Option<Arc<dyn PubSubBus>>) -> Arc<Self> {
        let codec = MessageCodec::new(CodecOptions::from(&config));
        Arc::new(Self {
            config,
            codec,
            registry: ConnectionRegistry::new(),
            dispatcher: Dispatcher::new(),
            hooks: Hooks::default(),
            bus,
        })
    }
}
