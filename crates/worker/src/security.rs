//! The `security:poll` processor: same pipeline as `log:pull`, but over the
//! graphql security-events dataset for zones without logpull access.
//!
//! Events are serialized line-by-line to NDJSON before archival, and the
//! resulting job commits into the same per-zone WORM chain as access-log
//! pulls.

use std::sync::Arc;

use async_trait::async_trait;
use logvault_core::worm;
use logvault_db::models::{Customer, JobStatus, LogJob, NewLogJob, Task};
use logvault_db::repositories::{CustomerRepo, LogJobRepo, ZoneRepo};
use logvault_edge::{EdgeError, GraphqlClient, SECURITY_EVENTS_LIMIT};
use logvault_notify::Severity;
use logvault_queue::{LogVerifyPayload, SecurityPollPayload, TaskError, TaskHandler};
use uuid::Uuid;

use crate::context::WorkerContext;

/// Object-key prefix for security-event archives.
const LOG_TYPE_SECURITY: &str = "security";

pub struct SecurityEventsProcessor {
    ctx: Arc<WorkerContext>,
}

impl SecurityEventsProcessor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Record the failure on the job row and raise an error alert for the
    /// zone.
    async fn fail_job(&self, job: &mut LogJob, error: &str) {
        job.attempts += 1;
        job.status = JobStatus::Failed;
        job.err_msg = error.to_string();
        if let Err(e) = LogJobRepo::mark_failed(&self.ctx.pool, job.id, job.attempts, error).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to record job failure");
        }

        let message = format!(
            "Security events job failed for zone {}: {error}",
            job.zone_id
        );
        if let Err(e) = self
            .ctx
            .notifier
            .send_alert(&job.zone_id.to_string(), Severity::Error, &message)
            .await
        {
            tracing::warn!(error = %e, "failure alert delivery failed");
        }
    }

    async fn notify_quota_exceeded(&self, customer: &Customer, usage: i64) {
        let message = format!(
            "Quota exceeded for customer {} (usage: {}, limit: {})",
            customer.name, usage, customer.quota_bytes
        );
        if let Err(e) = self
            .ctx
            .notifier
            .send_alert(&customer.id.to_string(), Severity::Warning, &message)
            .await
        {
            tracing::warn!(error = %e, "quota alert delivery failed");
        }
    }
}

#[async_trait]
impl TaskHandler for SecurityEventsProcessor {
    async fn process(&self, task: &Task) -> Result<(), TaskError> {
        let payload: SecurityPollPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| TaskError::Fatal(format!("parse payload: {e}")))?;
        let pool = &self.ctx.pool;

        let mut job = LogJobRepo::create(
            pool,
            &NewLogJob {
                id: Uuid::new_v4(),
                zone_id: payload.zone_id,
                customer_id: payload.customer_id,
                period_start: payload.period_start,
                period_end: payload.period_end,
            },
        )
        .await
        .map_err(|e| TaskError::Retriable(format!("create job: {e}")))?;

        let customer = match CustomerRepo::get_by_id(pool, payload.customer_id).await {
            Ok(c) => c,
            Err(e) => {
                let msg = format!("get customer: {e}");
                self.fail_job(&mut job, &msg).await;
                return Err(TaskError::Retriable(msg));
            }
        };
        let zone = match ZoneRepo::get_by_id(pool, payload.zone_id).await {
            Ok(z) => z,
            Err(e) => {
                let msg = format!("get zone: {e}");
                self.fail_job(&mut job, &msg).await;
                return Err(TaskError::Retriable(msg));
            }
        };

        let mut usage = 0i64;
        if customer.quota_bytes != -1 {
            usage = match LogJobRepo::current_month_usage(pool, customer.id).await {
                Ok(u) => u,
                Err(e) => {
                    let msg = format!("check quota: {e}");
                    self.fail_job(&mut job, &msg).await;
                    return Err(TaskError::Retriable(msg));
                }
            };
            if usage >= customer.quota_bytes {
                self.notify_quota_exceeded(&customer, usage).await;
                self.fail_job(&mut job, "quota exceeded").await;
                return Ok(());
            }
        }

        let api_token = match self.ctx.kms.decrypt(&customer.api_token_enc) {
            Ok(t) => t,
            Err(e) => {
                self.fail_job(&mut job, &format!("decrypt api token: {e}")).await;
                return Ok(());
            }
        };

        self.ctx.wait_for_upstream_slot().await;

        let client = match GraphqlClient::new(
            &self.ctx.edge.base_url,
            &api_token,
            self.ctx.edge.request_timeout,
        ) {
            Ok(c) => c,
            Err(e) => {
                let msg = format!("build graphql client: {e}");
                self.fail_job(&mut job, &msg).await;
                return Err(TaskError::Retriable(msg));
            }
        };

        let events = match client
            .security_events(&zone.edge_zone_id, payload.period_start, payload.period_end)
            .await
        {
            Ok(events) => events,
            Err(e @ EdgeError::Forbidden) => {
                self.fail_job(&mut job, &e.to_string()).await;
                return Ok(());
            }
            Err(e) => {
                let msg = format!("fetch security events: {e}");
                self.fail_job(&mut job, &msg).await;
                return Err(TaskError::Retriable(msg));
            }
        };

        // At the cap the dataset silently drops events; tell the operator
        // to shrink the poll interval.
        if events.len() >= SECURITY_EVENTS_LIMIT {
            tracing::warn!(
                zone = %zone.name,
                start = %payload.period_start,
                end = %payload.period_end,
                "security events limit reached, potential data loss",
            );
            let message = format!(
                "Security events limit reached ({SECURITY_EVENTS_LIMIT}) for zone {}. \
                 Potential data loss.",
                zone.name
            );
            if let Err(e) = self
                .ctx
                .notifier
                .send_alert(&zone.id.to_string(), Severity::Warning, &message)
                .await
            {
                tracing::warn!(error = %e, "limit alert delivery failed");
            }
        }

        if events.is_empty() {
            job.status = JobStatus::Done;
            job.byte_count = 0;
            job.log_count = 0;
            return LogJobRepo::update(pool, &job)
                .await
                .map_err(|e| TaskError::Retriable(format!("update job: {e}")));
        }

        // Serialize to NDJSON, one event per line.
        let mut raw = Vec::new();
        for event in &events {
            match serde_json::to_vec(event) {
                Ok(line) => {
                    raw.extend_from_slice(&line);
                    raw.push(b'\n');
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize security event");
                }
            }
        }

        if customer.quota_bytes != -1 && usage + raw.len() as i64 > customer.quota_bytes {
            self.notify_quota_exceeded(&customer, usage).await;
            self.fail_job(&mut job, "quota exceeded").await;
            return Ok(());
        }

        let archived = match self
            .ctx
            .store
            .put_logs(
                customer.id,
                zone.id,
                payload.period_start,
                payload.period_end,
                &raw,
                LOG_TYPE_SECURITY,
            )
            .await
        {
            Ok(a) => a,
            Err(e) => {
                let msg = format!("archive upload: {e}");
                self.fail_job(&mut job, &msg).await;
                return Err(TaskError::Retriable(msg));
            }
        };

        // Shared chain: the last done job regardless of log type supplies
        // the previous hash, in the universal (created_at, id) order.
        let prev_hash = match LogJobRepo::get_last_done(pool, zone.id).await {
            Ok(Some(prev)) => prev.chain_hash,
            Ok(None) => worm::GENESIS_HASH.to_string(),
            Err(e) => {
                let msg = format!("read chain head: {e}");
                self.fail_job(&mut job, &msg).await;
                return Err(TaskError::Retriable(msg));
            }
        };
        let chain = worm::chain_hash(&prev_hash, &archived.sha256, &job.id.to_string());

        job.status = JobStatus::Done;
        job.s3_key = archived.key;
        job.s3_provider = archived.provider;
        job.sha256 = archived.sha256;
        job.chain_hash = chain;
        job.byte_count = archived.size;
        job.log_count = archived.lines;
        LogJobRepo::update(pool, &job)
            .await
            .map_err(|e| TaskError::Retriable(format!("update job: {e}")))?;

        if let Err(e) = self
            .ctx
            .queue
            .enqueue_log_verify(&LogVerifyPayload { job_id: job.id })
            .await
        {
            tracing::error!(
                job_id = %job.id,
                error = %e,
                "enqueue verify task failed, WORM integrity check deferred",
            );
        }

        Ok(())
    }
}
