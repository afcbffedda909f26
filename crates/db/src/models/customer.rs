//! Tenant model.

use logvault_core::types::{EntityId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `customers` table.
///
/// `api_token_enc` is the customer's upstream credential sealed by the KMS
/// key ring; it never leaves the process in plaintext and is excluded from
/// serialized output.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Customer {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub edge_account_id: String,
    #[serde(skip_serializing)]
    pub api_token_enc: String,
    pub retention_days: i32,
    /// Monthly archive byte budget; `-1` means unlimited.
    pub quota_bytes: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}
