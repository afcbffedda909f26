//! Monitored upstream zone model.

use logvault_core::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Upstream plan tier, stored as `TEXT`.
///
/// The plan decides how a zone is ingested: `enterprise` zones use the
/// logpull API, `free_pro` zones poll security events over graphql, and
/// `business` zones stream through the instant-logs daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Enterprise,
    Business,
    FreePro,
}

/// A row from the `zones` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Zone {
    pub id: EntityId,
    pub customer_id: EntityId,
    /// Identifier of the zone on the upstream edge platform.
    pub edge_zone_id: String,
    pub name: String,
    pub plan: Plan,
    /// Seconds between pulls; must stay below the upstream retention window.
    pub pull_interval_secs: i32,
    pub last_pulled_at: Option<Timestamp>,
    pub active: bool,
    pub created_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}
