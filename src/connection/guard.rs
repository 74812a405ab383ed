// src/connection/guard.rs

//! Defines `ConnectionGuard`, the single finalization path of a connection.

use super::handler::Connection;
use super::transport::{BoxedReader, BoxedWriter};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The socket halves and outbound queue receiver, owned by whoever runs the
/// connection's loops.
pub(crate) struct ConnectionParts {
    pub(crate) reader: BoxedReader,
    pub(crate) writer: BoxedWriter,
    pub(crate) outbound_rx: mpsc::Receiver<Bytes>,
}

/// Lifecycle of a connection, guarded by the connection's state lock.
pub(crate) enum Lifecycle {
    /// Accepted but not yet opened. Holds the parts `open` will hand to the loops.
    Idle(Box<ConnectionParts>),
    Active,
    Closed,
}

/// Finalizes a connection exactly once.
///
/// `Connection::open` creates one guard after winning the `Idle -> Active`
/// transition and calls [`ConnectionGuard::finalize`] once both loops have
/// stopped. If the open task is dropped before that (runtime shutdown, task
/// abort), `Drop` still removes the connection from the registry.
pub(crate) struct ConnectionGuard {
    conn: Arc<Connection>,
    done: bool,
}

impl ConnectionGuard {
    pub(crate) fn new(conn: Arc<Connection>) -> Self {
        Self { conn, done: false }
    }

    /// Runs the finalization steps: on-close hook, close the outbound queue,
    /// close the socket, mark closed, leave the registry.
    ///
    /// Pieces lost to a panicked loop are passed as `None` and are already dropped.
    pub(crate) async fn finalize(
        mut self,
        reader: Option<BoxedReader>,
        writer: Option<BoxedWriter>,
        outbound_rx: Option<mpsc::Receiver<Bytes>>,
        run_close_hook: bool,
    ) {
        self.done = true;
        let conn = self.conn.clone();

        if !conn.mark_closed() {
            debug!("Connection {} was already finalized.", conn.id());
            return;
        }

        if run_close_hook {
            conn.state().hooks.call_on_close(&conn);
        }

        if let Some(mut rx) = outbound_rx {
            rx.close();
            let dropped = std::iter::from_fn(|| rx.try_recv().ok()).count();
            if dropped > 0 {
                debug!(
                    "Connection {}: discarded {} queued outbound messages.",
                    conn.id(),
                    dropped
                );
            }
        }

        if let Some(mut writer) = writer
            && let Err(e) = writer.close().await
            && !e.is_normal_disconnect()
        {
            warn!("Closing socket of connection {} failed: {}", conn.id(), e);
        }
        drop(reader);

        conn.state().registry.remove(&conn);
        info!("Connection {} finalized.", conn.id());
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        debug!(
            "ConnectionGuard for {} dropped before finalization, cleaning up.",
            self.conn.id()
        );
        self.conn.close();
        self.conn.mark_closed();
        self.conn.state().registry.remove(&self.conn);
    }
}
