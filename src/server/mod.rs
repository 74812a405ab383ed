// src/server/mod.rs

//! The composition root: a `Server` owns the shared state, accepts sockets
//! handed over by the upgrade layer and runs the redirection pipeline.

use crate::config::Config;
use crate::connection::Connection;
use crate::connection::transport::{self, BoxedReader, BoxedWriter};
use crate::core::RiftError;
use crate::core::bus::{PubSubBus, RespBus, encode_payload};
use crate::core::dispatcher::Router;
use crate::core::id::SonyflakeGenerator;
use crate::core::protocol::Message;
use crate::core::state::ServerState;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

mod connection_loop;
mod distribute;

pub use distribute::DistributeState;

pub struct Server {
    state: Arc<ServerState>,
    distribution: Mutex<DistributeState>,
    /// Serializes `enable_distribution` so the bus is probed once.
    enable_lock: tokio::sync::Mutex<()>,
    /// Stops the distribution loops.
    distribution_cancel: CancellationToken,
    /// The `open` task of every accepted connection.
    conn_tasks: TaskTracker,
}

impl Server {
    /// Builds a server. A RESP bus client is attached when
    /// `distribute.enabled` is set; nothing connects until
    /// [`Server::enable_distribution`] runs.
    pub fn new(config: Config) -> Self {
        let bus: Option<Arc<dyn PubSubBus>> = config
            .distribute
            .enabled
            .then(|| Arc::new(RespBus::from_config(&config.distribute)) as Arc<dyn PubSubBus>);
        Self::with_optional_bus(config, bus)
    }

    /// Builds a server attached to the given bus.
    pub fn with_bus(config: Config, bus: Arc<dyn PubSubBus>) -> Self {
        Self::with_optional_bus(config, Some(bus))
    }

    fn with_optional_bus(config: Config, bus: Option<Arc<dyn PubSubBus>>) -> Self {
        Self {
            state: ServerState::new(config, bus),
            distribution: Mutex::new(DistributeState::Disabled),
            enable_lock: tokio::sync::Mutex::new(()),
            distribution_cancel: CancellationToken::new(),
            conn_tasks: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    pub fn add_router<R: Router>(&self, msg_type: u32, router: R) -> Result<(), RiftError> {
        self.state.dispatcher.add_router(msg_type, router)
    }

    pub fn set_on_conn_open<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.state.hooks.set_on_open(hook);
    }

    pub fn set_on_conn_close<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.state.hooks.set_on_close(hook);
    }

    /// Starts the worker pool configured by `worker_pool_size`.
    pub fn start(&self) -> Result<(), RiftError> {
        let config = &self.state.config;
        self.state.dispatcher.start_work_pool(
            config.worker_pool_size as usize,
            config.max_worker_task_len as usize,
        )?;
        info!(
            "Server started: {} worker lanes, max package size {}.",
            config.worker_pool_size, config.max_package_size
        );
        Ok(())
    }

    pub fn distribute_state(&self) -> DistributeState {
        *self.distribution.lock()
    }

    /// Probes the bus, subscribes to the world channel and starts the
    /// subscriber and redirect loops. Does nothing if already running.
    pub async fn enable_distribution(&self) -> Result<(), RiftError> {
        let bus = self
            .state
            .bus
            .clone()
            .ok_or(RiftError::DistributionDisabled)?;
        let _serialized = self.enable_lock.lock().await;
        if self.distribute_state() == DistributeState::Running {
            return Ok(());
        }

        bus.ping().await?;
        *self.distribution.lock() = DistributeState::Enabled;
        info!("Bus reachable, distribution enabled.");

        let world_channel = &self.state.config.distribute.world_channel;
        let subscription = match bus.subscribe(world_channel).await {
            Ok(subscription) => subscription,
            Err(e) => {
                *self.distribution.lock() = DistributeState::Disabled;
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(distribute::REDIRECT_QUEUE_LEN);
        tokio::spawn(distribute::subscriber_loop(
            subscription,
            tx,
            self.distribution_cancel.child_token(),
        ));
        tokio::spawn(distribute::redirect_loop(
            self.state.clone(),
            rx,
            self.distribution_cancel.child_token(),
        ));
        *self.distribution.lock() = DistributeState::Running;
        info!("Distribution running on '{}'.", world_channel);
        Ok(())
    }

    /// Publishes `message` on the world channel, addressed to connection
    /// `target_conn_id` on whichever instance holds it.
    pub async fn publish_world(
        &self,
        target_conn_id: u64,
        message: Message,
    ) -> Result<usize, RiftError> {
        let bus = self
            .state
            .bus
            .as_ref()
            .ok_or(RiftError::DistributionDisabled)?;
        let frame = self
            .state
            .codec
            .encode(&message.with_source_conn_id(target_conn_id))?;
        bus.publish(
            &self.state.config.distribute.world_channel,
            encode_payload(&frame),
        )
        .await
    }

    /// Registers a connection over the given socket halves and spawns its
    /// `open` task.
    pub fn accept(
        &self,
        id: u64,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) -> Result<Arc<Connection>, RiftError> {
        let conn = Connection::new(id, self.state.clone(), reader, writer);
        self.state.registry.add(conn.clone())?;
        let task = conn.clone();
        self.conn_tasks.spawn(async move {
            if let Err(e) = task.open().await {
                debug!("Connection {} did not open: {}", task.id(), e);
            }
        });
        Ok(conn)
    }

    /// Accepts a WebSocket whose handshake has completed.
    pub fn accept_websocket<S>(
        &self,
        id: u64,
        ws: WebSocketStream<S>,
    ) -> Result<Arc<Connection>, RiftError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = transport::websocket_halves(ws, self.state.config.message.format);
        self.accept(id, reader, writer)
    }

    /// Accepts a raw byte stream whose HTTP upgrade already completed.
    pub async fn serve_raw_socket<S>(
        &self,
        id: u64,
        socket: S,
    ) -> Result<Arc<Connection>, RiftError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) =
            transport::from_raw_socket(socket, self.state.config.message.format).await;
        self.accept(id, reader, writer)
    }

    pub fn connection_count(&self) -> usize {
        self.state.registry.count()
    }

    pub fn connection(&self, id: u64) -> Result<Arc<Connection>, RiftError> {
        self.state.registry.get(id)
    }

    /// Stops the distribution loops and closes every connection.
    /// Connections accepted afterwards are rejected.
    pub fn stop(&self) {
        self.distribution_cancel.cancel();
        self.state.registry.clear();
        info!("Server stopped.");
    }

    /// Stops the server, then waits up to `grace` for every accepted
    /// connection to finish finalizing. Returns false if the wait timed out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        self.conn_tasks.close();
        let pending = self.conn_tasks.len();
        if tokio::time::timeout(grace, self.conn_tasks.wait()).await.is_err() {
            warn!(
                "{} of {} connections still finalizing after {:?}.",
                self.conn_tasks.len(),
                pending,
                grace
            );
            return false;
        }
        info!("All {} connections finalized.", pending);
        true
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.distribution_cancel.cancel();
    }
}

/// Runs the bundled WebSocket server until SIGINT or SIGTERM.
pub async fn run(config: Config, configure: impl FnOnce(&Server) -> Result<()>) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Riftline listening on {}", addr);

    let ids = Arc::new(SonyflakeGenerator::new(config.id.machine_id));
    let distribute = config.distribute.enabled;
    let server = Arc::new(Server::new(config));
    configure(&server)?;
    server.start().context("Failed to start worker pool")?;
    if distribute {
        server
            .enable_distribution()
            .await
            .context("Failed to enable distribution")?;
    }

    connection_loop::run(server, listener, ids).await
}
