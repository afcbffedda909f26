//! Repository for the `zones` table.

use logvault_core::types::{EntityId, Timestamp};
use sqlx::PgPool;

use crate::models::Zone;

/// Column list for `zones` queries.
const COLUMNS: &str = "\
    id, customer_id, edge_zone_id, name, plan, pull_interval_secs, \
    last_pulled_at, active, created_at, deleted_at";

pub struct ZoneRepo;

impl ZoneRepo {
    /// Fetch a zone by id, including inactive ones (workers need the row to
    /// fail a job meaningfully). Soft-deleted zones are excluded.
    pub async fn get_by_id(pool: &PgPool, id: EntityId) -> Result<Zone, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM zones WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Zone>(&query)
            .bind(id)
            .fetch_one(pool)
            .await
    }

    /// Zones whose pull interval has elapsed (or that were never pulled).
    pub async fn list_due(pool: &PgPool) -> Result<Vec<Zone>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM zones \
             WHERE active = true \
               AND deleted_at IS NULL \
               AND (last_pulled_at IS NULL OR \
                    last_pulled_at < now() - make_interval(secs => pull_interval_secs)) \
             ORDER BY last_pulled_at ASC NULLS FIRST"
        );
        sqlx::query_as::<_, Zone>(&query).fetch_all(pool).await
    }

    /// All active, non-deleted zones. The instant-logs supervisor filters
    /// this down to the business plan on every reconcile tick.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Zone>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM zones \
             WHERE active = true AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, Zone>(&query).fetch_all(pool).await
    }

    /// Record the end of a successfully enqueued window. Skipping this would
    /// re-enqueue the zone on the very next scheduler tick.
    pub async fn update_last_pulled(
        pool: &PgPool,
        id: EntityId,
        pulled_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE zones SET last_pulled_at = $2 WHERE id = $1")
            .bind(id)
            .bind(pulled_at)
            .execute(pool)
            .await?;
        Ok(())
    }
}
