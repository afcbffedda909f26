//! Task envelopes and the enqueue client for the delayed-job queue.
//!
//! Scheduler-produced window tasks carry deterministic ids
//! (`pull-<zone>-<start_unix>`), so a second enqueue for the same window is
//! rejected by the queue's primary key and reported as
//! [`EnqueueError::TaskIdConflict`], which callers treat as success.

pub mod broker;

use chrono::{DateTime, Utc};
use logvault_db::repositories::{NewTask, TaskRepo};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

pub use broker::{Broker, TaskError, TaskHandler};

// ---------------------------------------------------------------------------
// Task kinds and queues
// ---------------------------------------------------------------------------

pub const TYPE_LOG_PULL: &str = "log:pull";
pub const TYPE_SECURITY_POLL: &str = "security:poll";
pub const TYPE_LOG_VERIFY: &str = "log:verify";
pub const TYPE_LOG_EXPIRE: &str = "log:expire";
pub const TYPE_LOG_EXPORT: &str = "log:export";

pub const QUEUE_CRITICAL: &str = "critical";
pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_LOW: &str = "low";

/// Queue service weights: critical 6, default 3, low 1.
pub const QUEUE_WEIGHTS: &[(&str, usize)] = &[
    (QUEUE_CRITICAL, 6),
    (QUEUE_DEFAULT, 3),
    (QUEUE_LOW, 1),
];

/// Default retry budget before a task is dead-lettered.
pub const DEFAULT_MAX_RETRIES: i32 = 10;

/// Exports touch customer infrastructure; give up earlier.
pub const EXPORT_MAX_RETRIES: i32 = 3;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload for [`TYPE_LOG_PULL`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPullPayload {
    pub zone_id: Uuid,
    pub customer_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Payload for [`TYPE_SECURITY_POLL`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPollPayload {
    pub zone_id: Uuid,
    pub customer_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Payload for [`TYPE_LOG_VERIFY`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogVerifyPayload {
    pub job_id: Uuid,
}

/// Payload for [`TYPE_LOG_EXPIRE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogExpirePayload {
    pub customer_id: Uuid,
    pub retention_days: i32,
}

/// Payload for [`TYPE_LOG_EXPORT`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogExportPayload {
    pub export_id: Uuid,
}

// ---------------------------------------------------------------------------
// Task ids
// ---------------------------------------------------------------------------

/// Deterministic id for a pull window: `pull-<zone>-<start_unix>`.
pub fn pull_task_id(zone_id: Uuid, period_start: DateTime<Utc>) -> String {
    format!("pull-{zone_id}-{}", period_start.timestamp())
}

/// Deterministic id for a security-poll window: `sec-<zone>-<start_unix>`.
pub fn security_task_id(zone_id: Uuid, period_start: DateTime<Utc>) -> String {
    format!("sec-{zone_id}-{}", period_start.timestamp())
}

// ---------------------------------------------------------------------------
// Enqueue client
// ---------------------------------------------------------------------------

/// Enqueue failures.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// A task with this id already exists: the same window was already
    /// enqueued (possibly by another scheduler instance). Benign.
    #[error("queue: task id conflict")]
    TaskIdConflict,

    #[error("queue: marshal payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("queue: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for EnqueueError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return EnqueueError::TaskIdConflict;
            }
        }
        EnqueueError::Database(e)
    }
}

/// Submits tasks onto the queue. Cheap to clone; shares the pool.
#[derive(Clone)]
pub struct QueueClient {
    pool: PgPool,
}

impl QueueClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a pull window under its deterministic id.
    pub async fn enqueue_log_pull(&self, payload: &LogPullPayload) -> Result<(), EnqueueError> {
        self.enqueue(
            pull_task_id(payload.zone_id, payload.period_start),
            TYPE_LOG_PULL,
            QUEUE_DEFAULT,
            serde_json::to_value(payload)?,
            DEFAULT_MAX_RETRIES,
        )
        .await
    }

    /// Enqueue a security-poll window under its deterministic id.
    pub async fn enqueue_security_poll(
        &self,
        payload: &SecurityPollPayload,
    ) -> Result<(), EnqueueError> {
        self.enqueue(
            security_task_id(payload.zone_id, payload.period_start),
            TYPE_SECURITY_POLL,
            QUEUE_DEFAULT,
            serde_json::to_value(payload)?,
            DEFAULT_MAX_RETRIES,
        )
        .await
    }

    /// Enqueue an integrity check for an archived job.
    pub async fn enqueue_log_verify(&self, payload: &LogVerifyPayload) -> Result<(), EnqueueError> {
        self.enqueue(
            format!("verify-{}-{}", payload.job_id, Uuid::new_v4()),
            TYPE_LOG_VERIFY,
            QUEUE_LOW,
            serde_json::to_value(payload)?,
            DEFAULT_MAX_RETRIES,
        )
        .await
    }

    /// Enqueue a retention sweep for one customer.
    pub async fn enqueue_log_expire(&self, payload: &LogExpirePayload) -> Result<(), EnqueueError> {
        self.enqueue(
            format!("expire-{}-{}", payload.customer_id, Uuid::new_v4()),
            TYPE_LOG_EXPIRE,
            QUEUE_LOW,
            serde_json::to_value(payload)?,
            DEFAULT_MAX_RETRIES,
        )
        .await
    }

    /// Enqueue a bulk export, capped at [`EXPORT_MAX_RETRIES`] attempts.
    pub async fn enqueue_log_export(&self, payload: &LogExportPayload) -> Result<(), EnqueueError> {
        self.enqueue(
            format!("export-{}-{}", payload.export_id, Uuid::new_v4()),
            TYPE_LOG_EXPORT,
            QUEUE_LOW,
            serde_json::to_value(payload)?,
            EXPORT_MAX_RETRIES,
        )
        .await
    }

    async fn enqueue(
        &self,
        id: String,
        kind: &str,
        queue: &str,
        payload: serde_json::Value,
        max_retries: i32,
    ) -> Result<(), EnqueueError> {
        TaskRepo::enqueue(
            &self.pool,
            &NewTask {
                id,
                kind: kind.to_string(),
                queue: queue.to_string(),
                payload,
                max_retries,
                delay: None,
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn window_task_ids_are_deterministic() {
        let zone = Uuid::nil();
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 22, 0, 0).unwrap();

        assert_eq!(
            pull_task_id(zone, start),
            format!("pull-{zone}-{}", start.timestamp())
        );
        assert_eq!(pull_task_id(zone, start), pull_task_id(zone, start));
        assert_eq!(
            security_task_id(zone, start),
            format!("sec-{zone}-{}", start.timestamp())
        );
        // Different windows never collide.
        let later = start + chrono::Duration::seconds(300);
        assert_ne!(pull_task_id(zone, start), pull_task_id(zone, later));
    }

    #[test]
    fn payloads_use_snake_case_fields() {
        let payload = LogPullPayload {
            zone_id: Uuid::nil(),
            customer_id: Uuid::nil(),
            period_start: Utc.with_ymd_and_hms(2024, 1, 31, 22, 0, 0).unwrap(),
            period_end: Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap(),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("zone_id").is_some());
        assert!(value.get("customer_id").is_some());
        assert!(value.get("period_start").is_some());
        assert!(value.get("period_end").is_some());
    }

    #[test]
    fn queue_weights_are_six_three_one() {
        assert_eq!(
            QUEUE_WEIGHTS,
            &[(QUEUE_CRITICAL, 6), (QUEUE_DEFAULT, 3), (QUEUE_LOW, 1)]
        );
    }
}
