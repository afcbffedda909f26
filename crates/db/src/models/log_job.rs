//! Archive job model: one fetch-and-archive unit per pull window.

use logvault_core::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a log job, stored as `TEXT`.
///
/// Once a job reaches `Done` with `sha256`/`chain_hash` set those fields are
/// immutable; the only later changes are the `verified_at` stamp and the
/// terminal `Done -> Expired` transition performed by the retention worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Expired,
}

/// A row from the `log_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LogJob {
    pub id: EntityId,
    pub zone_id: EntityId,
    pub customer_id: EntityId,
    /// Half-open pull window `[period_start, period_end)`.
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub status: JobStatus,
    pub s3_key: String,
    /// Label of the storage backend that won the fan-out put.
    pub s3_provider: String,
    /// SHA-256 hex of the archived (compressed) bytes.
    pub sha256: String,
    /// Link in the per-zone WORM chain.
    pub chain_hash: String,
    pub byte_count: i64,
    pub log_count: i64,
    pub attempts: i32,
    pub err_msg: String,
    pub verified_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Insert payload for a fresh `pending` job row.
#[derive(Debug, Clone)]
pub struct NewLogJob {
    pub id: EntityId,
    pub zone_id: EntityId,
    pub customer_id: EntityId,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
}
