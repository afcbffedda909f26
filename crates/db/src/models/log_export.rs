//! Customer-requested bulk export model.

use logvault_core::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of an export request, stored as `TEXT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A row from the `log_exports` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LogExport {
    pub id: EntityId,
    pub customer_id: EntityId,
    /// Destination bucket configuration, sealed by the KMS key ring.
    #[serde(skip_serializing)]
    pub dest_config_enc: String,
    /// Source filter: jobs whose window falls inside `[start, end]`.
    pub filter_start: Timestamp,
    pub filter_end: Timestamp,
    pub status: ExportStatus,
    pub log_count: i64,
    pub byte_count: i64,
    pub error_msg: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Plaintext shape of the sealed destination config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDestConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub path_prefix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dest_config_parses_with_and_without_prefix() {
        let full: ExportDestConfig = serde_json::from_str(
            r#"{"endpoint":"https://s3.example","region":"eu-central-1",
                "bucket":"audit","access_key_id":"AK","secret_access_key":"SK",
                "path_prefix":"compliance/"}"#,
        )
        .unwrap();
        assert_eq!(full.path_prefix, "compliance/");

        let bare: ExportDestConfig = serde_json::from_str(
            r#"{"endpoint":"https://s3.example","region":"eu-central-1",
                "bucket":"audit","access_key_id":"AK","secret_access_key":"SK"}"#,
        )
        .unwrap();
        assert_eq!(bare.path_prefix, "");
    }
}
