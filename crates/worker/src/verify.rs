//! The `log:verify` processor: re-read an archive and attest that its
//! bytes still match the hash recorded at archive time.
//!
//! A successful verify stamps `verified_at`; it never re-enters the chain.
//! A mismatch is a data-integrity incident: the task fails to the
//! dead-letter queue and the archive is left in place as evidence.

use std::sync::Arc;

use async_trait::async_trait;
use logvault_core::worm;
use logvault_db::models::Task;
use logvault_db::repositories::LogJobRepo;
use logvault_queue::{LogVerifyPayload, TaskError, TaskHandler};

use crate::context::WorkerContext;

pub struct VerifyProcessor {
    ctx: Arc<WorkerContext>,
}

impl VerifyProcessor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for VerifyProcessor {
    async fn process(&self, task: &Task) -> Result<(), TaskError> {
        let payload: LogVerifyPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| TaskError::Fatal(format!("parse payload: {e}")))?;

        let job = match LogJobRepo::get_by_id(&self.ctx.pool, payload.job_id).await {
            Ok(job) => job,
            Err(sqlx::Error::RowNotFound) => {
                return Err(TaskError::Fatal(format!(
                    "job {} does not exist",
                    payload.job_id
                )));
            }
            Err(e) => return Err(TaskError::Retriable(format!("get job: {e}"))),
        };

        if job.s3_key.is_empty() || job.sha256.is_empty() {
            return Err(TaskError::Fatal(format!(
                "job {} has no archive key or hash to verify",
                job.id
            )));
        }

        let data = self
            .ctx
            .store
            .get(&job.s3_key)
            .await
            .map_err(|e| TaskError::Retriable(format!("archive download: {e}")))?;

        if let Err(mismatch) = worm::verify_object(&data, &job.sha256) {
            tracing::error!(
                job_id = %job.id,
                zone_id = %job.zone_id,
                s3_key = %job.s3_key,
                expected_sha256 = %mismatch.expected,
                computed_sha256 = %mismatch.got,
                "WORM integrity violation detected",
            );
            // Dead-letter so an operator investigates; the archive is NOT
            // deleted.
            return Err(TaskError::Fatal(format!(
                "integrity violation on job {}: {mismatch}",
                job.id
            )));
        }

        // The stamp is an attestation, not a state machine step; losing it
        // only means the next verify writes it again.
        if let Err(e) = LogJobRepo::mark_verified(&self.ctx.pool, job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "mark verified failed");
        }

        Ok(())
    }
}
