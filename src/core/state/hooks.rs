// src/core/state/hooks.rs

//! Application callbacks run on connection open and close.

use crate::connection::Connection;
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

/// Runs before a connection's loops start. An `Err` rejects the connection.
pub type OnOpenHook = Arc<dyn Fn(&Arc<Connection>) -> anyhow::Result<()> + Send + Sync>;

/// Runs once during connection finalization.
pub type OnCloseHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    on_open: RwLock<Option<OnOpenHook>>,
    on_close: RwLock<Option<OnCloseHook>>,
}

impl Hooks {
    pub fn set_on_open<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(hook));
    }

    pub fn set_on_close<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(hook));
    }

    /// Invokes the on-open hook. A panicking hook counts as a rejection.
    pub fn call_on_open(&self, conn: &Arc<Connection>) -> anyhow::Result<()> {
        // Clone out so the hook never runs under the lock.
        let Some(hook) = self.on_open.read().clone() else {
            return Ok(());
        };
        match catch_unwind(AssertUnwindSafe(|| hook(conn))) {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("on-open hook panicked")),
        }
    }

    /// Invokes the on-close hook. Panics are logged and swallowed.
    pub fn call_on_close(&self, conn: &Arc<Connection>) {
        let Some(hook) = self.on_close.read().clone() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| hook(conn))).is_err() {
            error!("on-close hook panicked for connection {}", conn.id());
        }
    }
}
