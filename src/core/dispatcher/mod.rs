// src/core/dispatcher/mod.rs

//! Routes decoded messages to the router bound to their type, either on a
//! fresh task per message or through a fixed pool of worker lanes.
//!
//! With a pool of `N` lanes, every message of connection `id` goes to lane
//! `id % N`. Each lane has a single consumer, so messages of one connection
//! are handled in the order they were read.

mod request;
mod router;

pub use request::Request;
pub use router::{FnRouter, Router, handler_fn};

use crate::core::RiftError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

type RouterTable = DashMap<u32, Arc<dyn Router>>;

pub struct Dispatcher {
    routers: Arc<RouterTable>,
    /// Sender side of each worker lane. Set once by `start_work_pool`.
    lanes: OnceLock<Vec<mpsc::Sender<Request>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routers: Arc::new(DashMap::new()),
            lanes: OnceLock::new(),
        }
    }

    /// Binds `router` to `msg_type`. A type can only be bound once; the
    /// first binding stays active.
    pub fn add_router<R: Router>(&self, msg_type: u32, router: R) -> Result<(), RiftError> {
        match self.routers.entry(msg_type) {
            Entry::Occupied(_) => Err(RiftError::DuplicateRouter(msg_type)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(router));
                info!("Router added for message type {}.", msg_type);
                Ok(())
            }
        }
    }

    pub fn has_router(&self, msg_type: u32) -> bool {
        self.routers.contains_key(&msg_type)
    }

    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    /// Runs the router stages for one request. Failures are logged, never returned.
    pub async fn exec_handler(&self, request: Request) {
        exec_request(&self.routers, request).await;
    }

    /// Starts `size` worker lanes, each with a queue of `depth` requests.
    ///
    /// `size == 0` leaves the dispatcher in per-message task mode.
    pub fn start_work_pool(&self, size: usize, depth: usize) -> Result<(), RiftError> {
        if size == 0 {
            return Ok(());
        }
        if self.lanes.get().is_some() {
            return Err(RiftError::WorkPoolAlreadyStarted);
        }

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::channel(depth.max(1))).unzip();
        self.lanes
            .set(senders)
            .map_err(|_| RiftError::WorkPoolAlreadyStarted)?;

        for (lane, rx) in receivers.into_iter().enumerate() {
            tokio::spawn(run_worker(lane, self.routers.clone(), rx));
        }
        info!("Worker pool started with {} lanes.", size);
        Ok(())
    }

    pub fn is_work_pool_started(&self) -> bool {
        self.lanes.get().is_some()
    }

    pub fn worker_pool_size(&self) -> usize {
        self.lanes.get().map_or(0, Vec::len)
    }

    /// The lane that handles messages of connection `conn_id`, if the pool is running.
    pub fn lane_for(&self, conn_id: u64) -> Option<usize> {
        self.lanes
            .get()
            .map(|lanes| (conn_id % lanes.len() as u64) as usize)
    }

    /// Queues `request` on its connection's lane, waiting while the lane is full.
    pub async fn send_to_task_queue(&self, request: Request) -> Result<(), RiftError> {
        let lanes = self
            .lanes
            .get()
            .ok_or_else(|| RiftError::Internal("worker pool not started".into()))?;
        let lane = (request.conn_id() % lanes.len() as u64) as usize;
        lanes[lane]
            .send(request)
            .await
            .map_err(|_| RiftError::Internal(format!("worker lane {lane} has stopped")))
    }

    /// Hands `request` to a worker lane if the pool runs, otherwise to a new task.
    pub async fn dispatch(&self, request: Request) {
        if self.is_work_pool_started() {
            if let Err(e) = self.send_to_task_queue(request).await {
                warn!("Dropping request: {}", e);
            }
        } else {
            tokio::spawn(exec_request(self.routers.clone(), request));
        }
    }
}

async fn run_worker(lane: usize, routers: Arc<RouterTable>, mut rx: mpsc::Receiver<Request>) {
    debug!("Worker [{}] started.", lane);
    while let Some(request) = rx.recv().await {
        exec_request(&routers, request).await;
    }
    debug!("Worker [{}] stopped.", lane);
}

async fn exec_request(routers: impl AsRef<RouterTable>, request: Request) {
    let msg_type = request.msg_type();
    let conn_id = request.conn_id();
    // Clone the router out so no map guard is held across an await.
    let Some(router) = routers.as_ref().get(&msg_type).map(|r| r.value().clone()) else {
        debug!(
            "No router for message type {}, dropping message from connection {}.",
            msg_type, conn_id
        );
        return;
    };

    let stages = async {
        router
            .pre_handle(&request)
            .await
            .map_err(|e| ("pre_handle", e))?;
        router.handle(&request).await.map_err(|e| ("handle", e))?;
        router
            .post_handle(&request)
            .await
            .map_err(|e| ("post_handle", e))?;
        Ok::<(), (&'static str, anyhow::Error)>(())
    };

    match AssertUnwindSafe(stages).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err((stage, e))) => warn!(
            "{} for message type {} on connection {} failed: {:#}",
            stage, msg_type, conn_id, e
        ),
        Err(_) => error!(
            "Router for message type {} panicked on connection {}.",
            msg_type, conn_id
        ),
    }
}
