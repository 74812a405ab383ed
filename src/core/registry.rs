// src/core/registry.rs

//! The connection registry: a concurrency-safe map from connection id to the
//! live connection.

use crate::connection::Connection;
use crate::core::RiftError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<u64, Arc<Connection>>,
    /// Set by `clear`. Later `add` calls are rejected.
    closed: bool,
}

/// Tracks every open connection of a server under one read-write lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, replacing any entry with the same id.
    pub fn add(&self, conn: Arc<Connection>) -> Result<(), RiftError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(RiftError::RegistryClosed);
        }
        let id = conn.id();
        if inner.connections.insert(id, conn).is_some() {
            warn!("Connection id {} was already registered, replaced.", id);
        }
        debug!(
            "Registered connection {}, {} open.",
            id,
            inner.connections.len()
        );
        Ok(())
    }

    /// Closes `conn` and removes it, unless its id now refers to a different
    /// connection. Returns true if an entry was removed.
    pub fn remove(&self, conn: &Arc<Connection>) -> bool {
        conn.close();
        let mut inner = self.inner.write();
        let id = conn.id();
        let is_same = inner
            .connections
            .get(&id)
            .is_some_and(|existing| Arc::ptr_eq(existing, conn));
        if is_same {
            inner.connections.remove(&id);
            debug!(
                "Unregistered connection {}, {} open.",
                id,
                inner.connections.len()
            );
        }
        is_same
    }

    /// Closes and removes the connection registered under `id`.
    pub fn remove_by_id(&self, id: u64) -> Option<Arc<Connection>> {
        let removed = self.inner.write().connections.remove(&id);
        if let Some(conn) = &removed {
            conn.close();
        }
        removed
    }

    pub fn get(&self, id: u64) -> Result<Arc<Connection>, RiftError> {
        self.inner
            .read()
            .connections
            .get(&id)
            .cloned()
            .ok_or(RiftError::ConnectionNotFound(id))
    }

    pub fn count(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.inner.read().connections.keys().copied().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Closes and removes every connection, then rejects further `add` calls.
    ///
    /// The write lock is held for the whole drain, so no connection can be
    /// added halfway through.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let drained = inner.connections.len();
        for (_, conn) in inner.connections.drain() {
            conn.close();
        }
        inner.closed = true;
        info!("Closed and unregistered {} connections.", drained);
    }
}
