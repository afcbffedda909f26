//! Queue task row model.

use logvault_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Broker-side task state, stored as `TEXT`.
///
/// `Dead` is the dead-letter state: the task exhausted its retries (or hit a
/// data-integrity failure) and waits for operator intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Dead,
}

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    /// Deterministic for scheduler windows (`pull-<zone>-<unix>`), random
    /// for externally triggered work.
    pub id: String,
    pub kind: String,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_retries: i32,
    /// The task is invisible to claims until this instant.
    pub available_at: Timestamp,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
