//! The `log:pull` processor: fetch a window of access logs, archive it,
//! extend the zone's WORM chain, and schedule verification.

use std::sync::Arc;

use async_trait::async_trait;
use logvault_core::worm;
use logvault_db::models::{Customer, JobStatus, LogJob, NewLogJob, Task};
use logvault_db::repositories::{CustomerRepo, LogJobRepo, ZoneRepo};
use logvault_edge::{EdgeError, LogpullClient};
use logvault_notify::Severity;
use logvault_queue::{LogPullPayload, LogVerifyPayload, TaskError, TaskHandler};
use uuid::Uuid;

use crate::context::WorkerContext;

/// Re-queue delay when the window's end is still inside the upstream's
/// 1-minute serving delay.
const NOT_YET_AVAILABLE_DELAY: std::time::Duration = std::time::Duration::from_secs(90);

/// Object-key prefix for access-log archives.
const LOG_TYPE_ACCESS: &str = "logs";

pub struct PullProcessor {
    ctx: Arc<WorkerContext>,
}

impl PullProcessor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Record a failure on the job row. The caller decides whether the
    /// task retries (transient) or is acked (terminal policy error).
    async fn fail_job(&self, job: &mut LogJob, error: &str) {
        job.attempts += 1;
        job.status = JobStatus::Failed;
        job.err_msg = error.to_string();
        if let Err(e) = LogJobRepo::mark_failed(&self.ctx.pool, job.id, job.attempts, error).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to record job failure");
        }
    }

    /// Count the attempt but keep the job `pending`: the window was never
    /// served, the re-queued task will try it again.
    async fn defer_job(&self, job: &mut LogJob) {
        job.attempts += 1;
        if let Err(e) = LogJobRepo::update(&self.ctx.pool, job).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to record job deferral");
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
impl TaskHandler for PullProcessor {
    async fn process(&self, task: &Task) -> Result<(), TaskError> {
        let payload: LogPullPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| TaskError::Fatal(format!("parse payload: {e}")))?;
        let pool = &self.ctx.pool;

        // 1. Create the job row; every failure from here on updates it.
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

        // 2. Load the tenant pair and unseal the upstream credential.
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

        // 3. Quota pre-check: refuse to even fetch once the month's budget
        // is spent.
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
                // Cryptographic failures are terminal: retrying cannot
                // repair a bad key ring or a corrupted blob.
                self.fail_job(&mut job, &format!("decrypt api token: {e}")).await;
                return Ok(());
            }
        };

        // 4. Respect the shared upstream pacing.
        self.ctx.wait_for_upstream_slot().await;

        // 5. Fetch the half-open window [start, end).
        let client = match LogpullClient::new(
            &self.ctx.edge.base_url,
            &zone.edge_zone_id,
            &api_token,
            self.ctx.edge.request_timeout,
        ) {
            Ok(c) => c,
            Err(e) => {
                let msg = format!("build upstream client: {e}");
                self.fail_job(&mut job, &msg).await;
                return Err(TaskError::Retriable(msg));
            }
        };

        let raw = match client
            .pull_logs(payload.period_start, payload.period_end, None)
            .await
        {
            Ok(raw) => raw,
            Err(EdgeError::RateLimited { retry_after }) => {
                self.defer_job(&mut job).await;
                return Err(TaskError::RateLimited(retry_after));
            }
            Err(EdgeError::NotYetAvailable) => {
                self.defer_job(&mut job).await;
                return Err(TaskError::RateLimited(NOT_YET_AVAILABLE_DELAY));
            }
            Err(e @ EdgeError::WindowTooLarge) => {
                self.fail_job(&mut job, &e.to_string()).await;
                return Ok(());
            }
            Err(e @ EdgeError::Forbidden) => {
                tracing::error!(
                    job_id = %job.id,
                    zone = %zone.name,
                    "logpull API not available on this plan, not retrying",
                );
                self.fail_job(&mut job, &e.to_string()).await;
                return Ok(());
            }
            Err(e) => {
                let msg = format!("pull logs: {e}");
                self.fail_job(&mut job, &msg).await;
                return Err(TaskError::Retriable(msg));
            }
        };

        // 6. Empty window: done with zero counters, nothing to archive or
        // verify.
        if raw.is_empty() {
            job.status = JobStatus::Done;
            job.byte_count = 0;
            job.log_count = 0;
            return LogJobRepo::update(pool, &job)
                .await
                .map_err(|e| TaskError::Retriable(format!("update job: {e}")));
        }

        // Second quota gate, now that the fetched size is known: the
        // archive is never written past the budget.
        if customer.quota_bytes != -1 && usage + raw.len() as i64 > customer.quota_bytes {
            self.notify_quota_exceeded(&customer, usage).await;
            self.fail_job(&mut job, "quota exceeded").await;
            return Ok(());
        }

        // 7. Archive through the fan-out; the winning provider is recorded.
        let archived = match self
            .ctx
            .store
            .put_logs(
                customer.id,
                zone.id,
                payload.period_start,
                payload.period_end,
                &raw,
                LOG_TYPE_ACCESS,
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

        // 8. Extend the zone's WORM chain with the archived object's hash.
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

        // 9. Commit the finished job.
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

        // 10. Schedule the integrity check. The archive is durable at this
        // point, so an enqueue failure is loud but non-fatal.
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
