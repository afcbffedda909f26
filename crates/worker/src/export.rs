//! The `log:export` processor: copy a customer's archives in a time range
//! to a customer-supplied bucket.
//!
//! Archives are copied byte-for-byte (still gzip), so the destination holds
//! the same objects the chain attests to. Per-object failures are skipped
//! with a logged error; only setup failures fail the export as a whole.

use std::sync::Arc;

use async_trait::async_trait;
use logvault_db::models::{ExportDestConfig, ExportStatus, LogExport, Task};
use logvault_db::repositories::{LogExportRepo, LogJobRepo};
use logvault_notify::Severity;
use logvault_queue::{LogExportPayload, TaskError, TaskHandler};
use logvault_storage::{RemoteStore, S3Config};

use crate::context::WorkerContext;

pub struct ExportProcessor {
    ctx: Arc<WorkerContext>,
}

impl ExportProcessor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    async fn fail_export(&self, export: &mut LogExport, error: String) {
        export.status = ExportStatus::Failed;
        export.error_msg = Some(error.clone());
        if let Err(e) = LogExportRepo::update(&self.ctx.pool, export).await {
            tracing::error!(export_id = %export.id, error = %e, "failed to record export failure");
        }

        let message = format!("Bulk export failed: {error}");
        if let Err(e) = self
            .ctx
            .notifier
            .send_alert(&export.customer_id.to_string(), Severity::Error, &message)
            .await
        {
            tracing::warn!(error = %e, "export failure alert delivery failed");
        }
    }
}

/// Destination key: `<prefix>/YYYY/MM/DD/<job_id>.log.gz`, date taken from
/// the job's window start.
fn dest_key(prefix: &str, job: &logvault_db::models::LogJob) -> String {
    let date = job.period_start.format("%Y/%m/%d");
    let file = format!("{}.log.gz", job.id);
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{date}/{file}")
    } else {
        format!("{prefix}/{date}/{file}")
    }
}

#[async_trait]
impl TaskHandler for ExportProcessor {
    async fn process(&self, task: &Task) -> Result<(), TaskError> {
        let payload: LogExportPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| TaskError::Fatal(format!("parse payload: {e}")))?;
        let pool = &self.ctx.pool;

        let mut export = LogExportRepo::get_by_id(pool, payload.export_id)
            .await
            .map_err(|e| TaskError::Retriable(format!("get export: {e}")))?;

        export.status = ExportStatus::Processing;
        LogExportRepo::update(pool, &export)
            .await
            .map_err(|e| TaskError::Retriable(format!("update export status: {e}")))?;

        // Unseal and parse the customer's destination config.
        let dest_json = match self.ctx.kms.decrypt(&export.dest_config_enc) {
            Ok(j) => j,
            Err(e) => {
                self.fail_export(&mut export, format!("decrypt destination config: {e}"))
                    .await;
                return Ok(());
            }
        };
        let dest: ExportDestConfig = match serde_json::from_str(&dest_json) {
            Ok(d) => d,
            Err(e) => {
                self.fail_export(&mut export, format!("parse destination config: {e}"))
                    .await;
                return Ok(());
            }
        };

        let dest_store = match RemoteStore::s3_compatible(
            &S3Config {
                name: "export-destination".into(),
                endpoint: dest.endpoint.clone(),
                region: dest.region.clone(),
                bucket: dest.bucket.clone(),
                access_key_id: dest.access_key_id.clone(),
                secret_access_key: dest.secret_access_key.clone(),
            },
            "export-destination",
        ) {
            Ok(s) => s,
            Err(e) => {
                self.fail_export(&mut export, format!("destination config rejected: {e}"))
                    .await;
                return Ok(());
            }
        };

        let jobs = match LogJobRepo::list_for_export(
            pool,
            export.customer_id,
            export.filter_start,
            export.filter_end,
        )
        .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                let msg = format!("list jobs for export: {e}");
                self.fail_export(&mut export, msg.clone()).await;
                return Err(TaskError::Retriable(msg));
            }
        };

        let mut copied: i64 = 0;
        let mut bytes: i64 = 0;
        for job in &jobs {
            let data = match self.ctx.store.get(&job.s3_key).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(
                        job_id = %job.id,
                        s3_key = %job.s3_key,
                        error = %e,
                        "failed to read archive for export, skipping",
                    );
                    continue;
                }
            };

            let key = dest_key(&dest.path_prefix, job);
            let size = data.len() as i64;
            if let Err(e) = dest_store.put_raw(&key, data).await {
                tracing::error!(
                    job_id = %job.id,
                    dest_key = %key,
                    error = %e,
                    "failed to upload archive to destination, skipping",
                );
                continue;
            }

            copied += 1;
            bytes += size;
        }

        export.status = ExportStatus::Completed;
        export.log_count = copied;
        export.byte_count = bytes;
        LogExportRepo::update(pool, &export)
            .await
            .map_err(|e| TaskError::Retriable(format!("update export completion: {e}")))?;

        let message = format!("Bulk export completed: {copied} archives uploaded");
        if let Err(e) = self
            .ctx
            .notifier
            .send_alert(&export.customer_id.to_string(), Severity::Info, &message)
            .await
        {
            tracing::warn!(error = %e, "export completion alert delivery failed");
        }

        Ok(())
    }
}
