// src/server/connection_loop.rs

//! Contains the bundled accept loop: TCP accept, WebSocket handshake and
//! graceful shutdown on signals.

use super::Server;
use crate::core::id::IdGenerator;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for open connections to finalize.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Accepts sockets until a shutdown signal arrives, then stops the server.
pub async fn run(
    server: Arc<Server>,
    listener: TcpListener,
    ids: Arc<dyn IdGenerator>,
) -> Result<()> {
    let mut handshakes = JoinSet::new();

    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            res = listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                debug!("Accepted new socket from: {}", addr);

                let id = match ids.next_id() {
                    Ok(id) => id,
                    Err(e) => {
                        error!("Cannot assign an id to {}: {}", addr, e);
                        continue;
                    }
                };

                let server = server.clone();
                handshakes.spawn(async move {
                    match tokio_tungstenite::accept_async(socket).await {
                        Ok(ws) => match server.accept_websocket(id, ws) {
                            Ok(_) => info!("Connection {} established from {}", id, addr),
                            Err(e) => warn!("Rejected connection from {}: {}", addr, e),
                        },
                        Err(e) => warn!("WebSocket handshake error for {}: {}", addr, e),
                    }
                });
            }

            Some(res) = handshakes.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A handshake task panicked: {e:?}");
                }
            }
        }
    }

    handshakes.shutdown().await;
    server.shutdown(SHUTDOWN_GRACE).await;
    info!("Server shutdown complete.");
    Ok(())
}
