//! Repository for the `log_jobs` table.
//!
//! The scheduler owns the decision to create a job; the worker that claimed
//! the task owns every mutation until the job is terminal. No other writer
//! touches an in-flight row.

use logvault_core::types::{EntityId, Timestamp};
use sqlx::PgPool;

use crate::models::{JobStatus, LogJob, NewLogJob};

/// Column list for `log_jobs` queries.
const COLUMNS: &str = "\
    id, zone_id, customer_id, period_start, period_end, status, \
    s3_key, s3_provider, sha256, chain_hash, byte_count, log_count, \
    attempts, err_msg, verified_at, created_at, updated_at";

pub struct LogJobRepo;

impl LogJobRepo {
    /// Insert a fresh `pending` row for a pull window.
    pub async fn create(pool: &PgPool, new: &NewLogJob) -> Result<LogJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO log_jobs (id, zone_id, customer_id, period_start, period_end, status) \
             VALUES ($1, $2, $3, $4, $5, 'pending') \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LogJob>(&query)
            .bind(new.id)
            .bind(new.zone_id)
            .bind(new.customer_id)
            .bind(new.period_start)
            .bind(new.period_end)
            .fetch_one(pool)
            .await
    }

    /// Write back every worker-owned field in one statement.
    pub async fn update(pool: &PgPool, job: &LogJob) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE log_jobs SET \
                 status = $2, s3_key = $3, s3_provider = $4, sha256 = $5, \
                 chain_hash = $6, byte_count = $7, log_count = $8, \
                 attempts = $9, err_msg = $10, verified_at = $11, \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status)
        .bind(&job.s3_key)
        .bind(&job.s3_provider)
        .bind(&job.sha256)
        .bind(&job.chain_hash)
        .bind(job.byte_count)
        .bind(job.log_count)
        .bind(job.attempts)
        .bind(&job.err_msg)
        .bind(job.verified_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_id(pool: &PgPool, id: EntityId) -> Result<LogJob, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM log_jobs WHERE id = $1");
        sqlx::query_as::<_, LogJob>(&query)
            .bind(id)
            .fetch_one(pool)
            .await
    }

    /// Latest `done` job on a zone in chain order. Its `chain_hash` is the
    /// `prev` input for the next link; `None` means the chain starts at
    /// genesis.
    pub async fn get_last_done(
        pool: &PgPool,
        zone_id: EntityId,
    ) -> Result<Option<LogJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM log_jobs \
             WHERE zone_id = $1 AND status = 'done' \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, LogJob>(&query)
            .bind(zone_id)
            .fetch_optional(pool)
            .await
    }

    /// `done` jobs whose window ended before the customer's retention
    /// horizon (GDPR art. 17 erasure candidates).
    pub async fn list_expired(
        pool: &PgPool,
        customer_id: EntityId,
        retention_days: i32,
    ) -> Result<Vec<LogJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM log_jobs \
             WHERE customer_id = $1 \
               AND status = 'done' \
               AND period_end < now() - make_interval(days => $2)"
        );
        sqlx::query_as::<_, LogJob>(&query)
            .bind(customer_id)
            .bind(retention_days)
            .fetch_all(pool)
            .await
    }

    /// Terminal `done -> expired` transition after object deletion.
    pub async fn mark_expired(pool: &PgPool, id: EntityId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE log_jobs SET status = 'expired', updated_at = now() \
             WHERE id = $1 AND status = 'done'",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Stamp `verified_at` after a successful integrity check.
    pub async fn mark_verified(pool: &PgPool, id: EntityId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE log_jobs SET verified_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Sum of archived bytes committed this calendar month, for quota
    /// enforcement.
    pub async fn current_month_usage(
        pool: &PgPool,
        customer_id: EntityId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(byte_count), 0)::BIGINT FROM log_jobs \
             WHERE customer_id = $1 \
               AND status = 'done' \
               AND created_at >= date_trunc('month', now())",
        )
        .bind(customer_id)
        .fetch_one(pool)
        .await
    }

    /// `done` jobs with an archive inside the export window, oldest first.
    pub async fn list_for_export(
        pool: &PgPool,
        customer_id: EntityId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<LogJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM log_jobs \
             WHERE customer_id = $1 \
               AND status = 'done' \
               AND s3_key <> '' \
               AND period_start >= $2 \
               AND period_end <= $3 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, LogJob>(&query)
            .bind(customer_id)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await
    }

    /// Convenience for the failure paths: bump attempts, record the error,
    /// and mark the row failed.
    pub async fn mark_failed(
        pool: &PgPool,
        id: EntityId,
        attempts: i32,
        err_msg: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE log_jobs SET status = $2, attempts = $3, err_msg = $4, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(JobStatus::Failed)
        .bind(attempts)
        .bind(err_msg)
        .execute(pool)
        .await?;
        Ok(())
    }
}
