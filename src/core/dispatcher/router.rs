// src/core/dispatcher/router.rs

//! The application-facing handler trait bound to one message type.

use super::Request;
use async_trait::async_trait;
use std::future::Future;

/// Handles every message of one type, in three stages.
///
/// Stages run in order and stop at the first `Err`. Only `handle` is required.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    async fn pre_handle(&self, _request: &Request) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle(&self, request: &Request) -> anyhow::Result<()>;

    async fn post_handle(&self, _request: &Request) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A [`Router`] made from an async closure that only implements `handle`.
pub struct FnRouter<F> {
    f: F,
}

/// Wraps an async closure as a [`Router`].
pub fn handler_fn<F, Fut>(f: F) -> FnRouter<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnRouter { f }
}

#[async_trait]
impl<F, Fut> Router for FnRouter<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, request: &Request) -> anyhow::Result<()> {
        (self.f)(request.clone()).await
    }
}
