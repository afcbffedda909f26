//! Repository for the `log_exports` table.

use logvault_core::types::EntityId;
use sqlx::PgPool;

use crate::models::{ExportStatus, LogExport};

/// Column list for `log_exports` queries.
const COLUMNS: &str = "\
    id, customer_id, dest_config_enc, filter_start, filter_end, status, \
    log_count, byte_count, error_msg, created_at, updated_at";

pub struct LogExportRepo;

impl LogExportRepo {
    /// Insert a `pending` export request (called by the control plane via
    /// the task-submission surface).
    pub async fn create(pool: &PgPool, export: &LogExport) -> Result<LogExport, sqlx::Error> {
        let query = format!(
            "INSERT INTO log_exports \
                 (id, customer_id, dest_config_enc, filter_start, filter_end, status) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LogExport>(&query)
            .bind(export.id)
            .bind(export.customer_id)
            .bind(&export.dest_config_enc)
            .bind(export.filter_start)
            .bind(export.filter_end)
            .bind(ExportStatus::Pending)
            .fetch_one(pool)
            .await
    }

    pub async fn get_by_id(pool: &PgPool, id: EntityId) -> Result<LogExport, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM log_exports WHERE id = $1");
        sqlx::query_as::<_, LogExport>(&query)
            .bind(id)
            .fetch_one(pool)
            .await
    }

    /// Write back status, counters, and error message.
    pub async fn update(pool: &PgPool, export: &LogExport) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE log_exports SET \
                 status = $2, log_count = $3, byte_count = $4, error_msg = $5, \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(export.id)
        .bind(export.status)
        .bind(export.log_count)
        .bind(export.byte_count)
        .bind(&export.error_msg)
        .execute(pool)
        .await?;
        Ok(())
    }
}
