//! Repository for the `tasks` table backing the delayed-job queue.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so any number of broker instances can
//! share one queue without double-dispatch. Deterministic task ids make the
//! primary key the dedupe point: a second enqueue for the same window fails
//! with a unique violation, which callers treat as benign.

use std::time::Duration;

use sqlx::PgPool;

use crate::models::Task;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, kind, queue, payload, status, attempts, max_retries, available_at, \
    last_error, created_at, updated_at";

/// Insert payload for [`TaskRepo::enqueue`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub kind: String,
    pub queue: String,
    pub payload: serde_json::Value,
    pub max_retries: i32,
    /// Earliest claim instant; `None` means immediately.
    pub delay: Option<Duration>,
}

pub struct TaskRepo;

impl TaskRepo {
    /// Insert a `pending` task. A duplicate id surfaces as a database
    /// unique violation; the queue client maps it to a conflict error.
    pub async fn enqueue(pool: &PgPool, new: &NewTask) -> Result<(), sqlx::Error> {
        let delay_secs = new.delay.unwrap_or_default().as_secs_f64();
        sqlx::query(
            "INSERT INTO tasks (id, kind, queue, payload, max_retries, available_at) \
             VALUES ($1, $2, $3, $4, $5, now() + make_interval(secs => $6))",
        )
        .bind(&new.id)
        .bind(&new.kind)
        .bind(&new.queue)
        .bind(&new.payload)
        .bind(new.max_retries)
        .bind(delay_secs)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Atomically claim the oldest available task on one queue.
    ///
    /// The claim bumps `attempts`, so the counter reflects executions
    /// started, not finished.
    pub async fn claim(pool: &PgPool, queue: &str) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks \
             SET status = 'running', attempts = attempts + 1, updated_at = now() \
             WHERE id = ( \
                 SELECT id FROM tasks \
                 WHERE queue = $1 AND status = 'pending' AND available_at <= now() \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(queue)
            .fetch_optional(pool)
            .await
    }

    /// Acknowledge successful processing.
    pub async fn mark_done(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET status = 'done', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Put a task back on the queue after `delay`, recording the error.
    pub async fn retry_later(
        pool: &PgPool,
        id: &str,
        delay: Duration,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks \
             SET status = 'pending', available_at = now() + make_interval(secs => $2), \
                 last_error = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Move a task to the dead-letter state for operator intervention.
    pub async fn mark_dead(pool: &PgPool, id: &str, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks \
             SET status = 'dead', last_error = $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Release a claim without judging the task (shutdown path). The
    /// attempt already counted; the task becomes claimable immediately.
    pub async fn release(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks SET status = 'pending', updated_at = now() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Pending depth per queue, for the health surface.
    pub async fn pending_depth(pool: &PgPool, queue: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE queue = $1 AND status = 'pending'",
        )
        .bind(queue)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
