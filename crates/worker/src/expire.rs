//! The `log:expire` processor: erase archives whose retention window has
//! closed and mark their rows expired.
//!
//! Per-object semantics: a delete failure leaves the row untouched so the
//! next cycle retries it; everything else proceeds. Repeat runs converge on
//! the same terminal state because backends treat missing keys as deleted.

use std::sync::Arc;

use async_trait::async_trait;
use logvault_core::types::EntityId;
use logvault_db::models::{LogJob, Task};
use logvault_db::repositories::LogJobRepo;
use logvault_queue::{LogExpirePayload, TaskError, TaskHandler};
use logvault_storage::{MultiStore, StorageError};
use sqlx::PgPool;

/// Job rows eligible for retention erasure. Narrowed from the full
/// repository so the per-object loop is testable without a database.
#[async_trait]
pub trait ExpirableJobs: Send + Sync {
    async fn list_expired(
        &self,
        customer_id: EntityId,
        retention_days: i32,
    ) -> Result<Vec<LogJob>, sqlx::Error>;

    async fn mark_expired(&self, id: EntityId) -> Result<(), sqlx::Error>;
}

/// Object deletion, narrowed from the fan-out store.
#[async_trait]
pub trait ObjectDeleter: Send + Sync {
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Postgres-backed [`ExpirableJobs`].
pub struct PgExpirableJobs {
    pool: PgPool,
}

impl PgExpirableJobs {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExpirableJobs for PgExpirableJobs {
    async fn list_expired(
        &self,
        customer_id: EntityId,
        retention_days: i32,
    ) -> Result<Vec<LogJob>, sqlx::Error> {
        LogJobRepo::list_expired(&self.pool, customer_id, retention_days).await
    }

    async fn mark_expired(&self, id: EntityId) -> Result<(), sqlx::Error> {
        LogJobRepo::mark_expired(&self.pool, id).await
    }
}

#[async_trait]
impl ObjectDeleter for MultiStore {
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        MultiStore::delete(self, key).await
    }
}

pub struct ExpireProcessor<R, S> {
    repo: Arc<R>,
    store: Arc<S>,
}

impl<R: ExpirableJobs, S: ObjectDeleter> ExpireProcessor<R, S> {
    pub fn new(repo: Arc<R>, store: Arc<S>) -> Self {
        Self { repo, store }
    }

    /// Sweep one customer: delete every expired archive and mark its row.
    pub async fn sweep(&self, customer_id: EntityId, retention_days: i32) -> Result<(), TaskError> {
        let jobs = self
            .repo
            .list_expired(customer_id, retention_days)
            .await
            .map_err(|e| TaskError::Retriable(format!("list expired jobs: {e}")))?;

        for job in jobs {
            if !job.s3_key.is_empty() {
                if let Err(e) = self.store.delete(&job.s3_key).await {
                    tracing::error!(
                        job_id = %job.id,
                        s3_key = %job.s3_key,
                        error = %e,
                        "failed to delete expired archive, leaving row for next cycle",
                    );
                    continue;
                }
            }
            if let Err(e) = self.repo.mark_expired(job.id).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to mark job expired");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<R: ExpirableJobs, S: ObjectDeleter> TaskHandler for ExpireProcessor<R, S> {
    async fn process(&self, task: &Task) -> Result<(), TaskError> {
        let payload: LogExpirePayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| TaskError::Fatal(format!("parse payload: {e}")))?;
        self.sweep(payload.customer_id, payload.retention_days).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use chrono::Utc;
    use logvault_db::models::JobStatus;
    use uuid::Uuid;

    use super::*;

    /// In-memory job table: rows leave the expired set once marked.
    struct FakeJobs {
        rows: Mutex<HashMap<EntityId, LogJob>>,
    }

    impl FakeJobs {
        fn with_done_jobs(keys: &[&str]) -> Self {
            let mut rows = HashMap::new();
            for key in keys {
                let job = make_job(key);
                rows.insert(job.id, job);
            }
            Self {
                rows: Mutex::new(rows),
            }
        }

        fn statuses(&self) -> HashMap<String, JobStatus> {
            self.rows
                .lock()
                .unwrap()
                .values()
                .map(|j| (j.s3_key.clone(), j.status))
                .collect()
        }
    }

    fn make_job(key: &str) -> LogJob {
        let now = Utc::now();
        LogJob {
            id: Uuid::new_v4(),
            zone_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            period_start: now - chrono::Duration::days(400),
            period_end: now - chrono::Duration::days(400) + chrono::Duration::hours(1),
            status: JobStatus::Done,
            s3_key: key.to_string(),
            s3_provider: "filesystem".into(),
            sha256: "deadbeef".into(),
            chain_hash: "cafe".into(),
            byte_count: 10,
            log_count: 1,
            attempts: 0,
            err_msg: String::new(),
            verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[async_trait]
    impl ExpirableJobs for FakeJobs {
        async fn list_expired(
            &self,
            _customer_id: EntityId,
            _retention_days: i32,
        ) -> Result<Vec<LogJob>, sqlx::Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.status == JobStatus::Done)
                .cloned()
                .collect())
        }

        async fn mark_expired(&self, id: EntityId) -> Result<(), sqlx::Error> {
            if let Some(job) = self.rows.lock().unwrap().get_mut(&id) {
                job.status = JobStatus::Expired;
            }
            Ok(())
        }
    }

    /// Deleter that fails for a configurable set of keys.
    struct FakeDeleter {
        failing: Mutex<HashSet<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeDeleter {
        fn new() -> Self {
            Self {
                failing: Mutex::new(HashSet::new()),
                deleted: Mutex::new(Vec::new()),
            }
        }

        fn fail_key(&self, key: &str) {
            self.failing.lock().unwrap().insert(key.to_string());
        }

        fn heal_key(&self, key: &str) {
            self.failing.lock().unwrap().remove(key);
        }
    }

    #[async_trait]
    impl ObjectDeleter for FakeDeleter {
        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            if self.failing.lock().unwrap().contains(key) {
                return Err(StorageError::NotFound(key.to_string()));
            }
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sweep_deletes_objects_and_marks_rows() {
        let jobs = Arc::new(FakeJobs::with_done_jobs(&["logs/a", "logs/b"]));
        let deleter = Arc::new(FakeDeleter::new());
        let processor = ExpireProcessor::new(Arc::clone(&jobs), Arc::clone(&deleter));

        processor.sweep(Uuid::new_v4(), 30).await.unwrap();

        let statuses = jobs.statuses();
        assert_eq!(statuses["logs/a"], JobStatus::Expired);
        assert_eq!(statuses["logs/b"], JobStatus::Expired);
        assert_eq!(deleter.deleted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_failure_leaves_row_for_next_cycle() {
        let jobs = Arc::new(FakeJobs::with_done_jobs(&["logs/a", "logs/b"]));
        let deleter = Arc::new(FakeDeleter::new());
        deleter.fail_key("logs/a");
        let processor = ExpireProcessor::new(Arc::clone(&jobs), Arc::clone(&deleter));

        processor.sweep(Uuid::new_v4(), 30).await.unwrap();

        let statuses = jobs.statuses();
        assert_eq!(statuses["logs/a"], JobStatus::Done);
        assert_eq!(statuses["logs/b"], JobStatus::Expired);

        // Next cycle: storage healed, the remaining row converges.
        deleter.heal_key("logs/a");
        processor.sweep(Uuid::new_v4(), 30).await.unwrap();
        assert_eq!(jobs.statuses()["logs/a"], JobStatus::Expired);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let jobs = Arc::new(FakeJobs::with_done_jobs(&["logs/a"]));
        let deleter = Arc::new(FakeDeleter::new());
        let processor = ExpireProcessor::new(Arc::clone(&jobs), Arc::clone(&deleter));

        processor.sweep(Uuid::new_v4(), 30).await.unwrap();
        let first = jobs.statuses();
        processor.sweep(Uuid::new_v4(), 30).await.unwrap();

        // A second run finds no done rows and changes nothing.
        assert_eq!(first, jobs.statuses());
        assert_eq!(deleter.deleted.lock().unwrap().len(), 1);
    }
}
