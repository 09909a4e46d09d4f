//! SurrealDB schema initialization
//!
//! Sets up collection tables and the shared migration bookkeeping table.
//! Every function is idempotent.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema::MIGRATIONS_TABLE;
use crate::storage_traits::{validate_collection_name, StoreResult};

/// Initialize one collection table
///
/// Schema:
/// ```text
/// TABLE <collection> {
///   record_id:   INT (unique, generator-assigned)
///   vector:      STRING (JSON float array)
///   payload:     STRING (JSON object)
///   created_at:  DATETIME
/// }
/// ```
///
/// The table name is interpolated, so it must pass `validate_collection_name`;
/// every value elsewhere is a bound parameter.
pub async fn init_collection_table(db: &Surreal<Any>, table: &str) -> StoreResult<()> {
    validate_collection_name(table)?;
    debug!(table, "Initializing collection table");

    let sql = format!(
        r#"
        DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;

        -- Generator ids are unique; a duplicate means two writers share a worker tag
        DEFINE INDEX IF NOT EXISTS idx_record_id ON TABLE {table} COLUMNS record_id UNIQUE;
    "#
    );

    db.query(sql)
        .await
        .and_then(|response| response.check())
        .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;
    info!(table, "✓ collection table initialized");
    Ok(())
}

/// Drop a collection table and every record in it.
pub async fn drop_collection_table(db: &Surreal<Any>, table: &str) -> StoreResult<()> {
    validate_collection_name(table)?;
    debug!(table, "Removing collection table");

    db.query(format!("REMOVE TABLE IF EXISTS {table};"))
        .await
        .and_then(|response| response.check())
        .map_err(|e| StoreError::Storage(e.to_string()))?;
    Ok(())
}

/// Initialize the `memory_migrations` table
///
/// Schema:
/// ```text
/// TABLE memory_migrations {
///   id:               [collection_name, sub_store_name]
///   collection_name:  STRING
///   sub_store_name:   STRING
///   status:           STRING (pending | migrating | completed | failed)
///   migrated_count:   INT
///   total_count:      INT
///   error_message:    STRING?
///   routing_filter:   STRING (JSON object)
///   created_at:       DATETIME
///   updated_at:       DATETIME
///   started_at:       DATETIME?
///   completed_at:     DATETIME?
/// }
/// ```
///
/// Constraints:
/// - `(collection_name, sub_store_name)` is unique; the record id is the
///   same pair, so concurrent upserts converge on one row
/// - status transitions are enforced by application logic
pub async fn init_migrations_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("Initializing {} table", MIGRATIONS_TABLE);

    let sql = format!(
        r#"
        DEFINE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_collection_sub_store ON TABLE {MIGRATIONS_TABLE}
            COLUMNS collection_name, sub_store_name UNIQUE;

        -- list_all() reads every row of one main collection
        DEFINE INDEX IF NOT EXISTS idx_collection ON TABLE {MIGRATIONS_TABLE}
            COLUMNS collection_name;
    "#
    );

    db.query(sql)
        .await
        .and_then(|response| response.check())
        .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;
    info!("✓ {} table initialized", MIGRATIONS_TABLE);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::SurrealHandle;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        init_collection_table(handle.db(), "memories").await.unwrap();
        init_collection_table(handle.db(), "memories").await.unwrap();
        init_migrations_table(handle.db()).await.unwrap();
        init_migrations_table(handle.db()).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_table_names_fail_before_io() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let err = init_collection_table(handle.db(), "x; REMOVE TABLE y")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn drop_missing_table_is_ok() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        drop_collection_table(handle.db(), "never_created").await.unwrap();
    }
}
