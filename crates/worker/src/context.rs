//! Shared dependencies handed to every processor.

use std::sync::Arc;

use logvault_kms::KeyRing;
use logvault_notify::Notifier;
use logvault_queue::QueueClient;
use logvault_storage::MultiStore;
use sqlx::PgPool;

use crate::config::EdgeConfig;
use crate::ratelimit::RateLimiter;

/// Bundle of shared services; one instance per process, cloned into each
/// processor behind an `Arc`.
pub struct WorkerContext {
    pub pool: PgPool,
    pub kms: Arc<KeyRing>,
    pub store: Arc<MultiStore>,
    pub queue: QueueClient,
    pub notifier: Arc<dyn Notifier>,
    /// Token bucket shared by the pull and security workers; `None` when
    /// upstream rate limiting is disabled.
    pub limiter: Option<Arc<RateLimiter>>,
    pub edge: EdgeConfig,
}

impl WorkerContext {
    /// Wait for an upstream request slot, if a limiter is configured.
    pub async fn wait_for_upstream_slot(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.wait().await;
        }
    }
}
