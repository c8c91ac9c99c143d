//! Job handler context trait
//!
//! The media library implements this trait. Both the executor (inline
//! invocations) and the queue worker (claimed jobs) call `dispatch_job`; the
//! implementation matches on the payload and runs the transformation or the
//! storage cleanup.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

use medialib_core::models::JobPayload;

/// Context for job dispatch.
///
/// Held weakly by the executor and the worker so the owner of the context can
/// also own them. Errors wrapping a [`medialib_core::JobError`] carry their
/// retry classification; any other error is retried.
#[async_trait]
pub trait JobHandlerContext: Send + Sync {
    async fn dispatch_job(self: Arc<Self>, payload: &JobPayload) -> Result<serde_json::Value>;
}

/// Placeholder context used before the real one exists. Dispatch always errors.
struct NoopContext;

#[async_trait]
impl JobHandlerContext for NoopContext {
    async fn dispatch_job(self: Arc<Self>, _payload: &JobPayload) -> Result<serde_json::Value> {
        Err(anyhow!("NoopContext: no handler context available"))
    }
}

/// A weak reference that never upgrades, for queues that only enqueue.
pub fn empty_context_weak() -> Weak<dyn JobHandlerContext> {
    let n: Arc<dyn JobHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
