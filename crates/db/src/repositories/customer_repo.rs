//! Repository for the `customers` table.

use logvault_core::types::EntityId;
use sqlx::PgPool;

use crate::models::Customer;

/// Column list for `customers` queries.
const COLUMNS: &str = "\
    id, name, email, edge_account_id, api_token_enc, retention_days, \
    quota_bytes, created_at, updated_at, deleted_at";

pub struct CustomerRepo;

impl CustomerRepo {
    /// Fetch a customer by id. Soft-deleted customers are not returned:
    /// their zones stop scheduling and their credentials are revoked.
    pub async fn get_by_id(pool: &PgPool, id: EntityId) -> Result<Customer, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM customers WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Customer>(&query)
            .bind(id)
            .fetch_one(pool)
            .await
    }
}
