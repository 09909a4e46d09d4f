//! SurrealDB-backed StatusTable implementation
//!
//! One row per (main collection, sub-store) in `memory_migrations`. The record
//! id is the pair itself, so every write is an atomic single-record statement
//! and concurrent registrations from different processes converge on one row.

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::method::Query;
use surrealdb::sql::Datetime as SurrealDatetime;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::handle::SurrealHandle;
use crate::migrations;
use crate::schema::{MigrationRow, MIGRATIONS_TABLE};
use crate::storage_traits::{Filters, MigrationRecord, StatusTable, StoreResult};

/// Insert `pending` or refresh filter/updated_at; existing status and counters survive.
const REGISTER: &str = r#"
    UPSERT type::thing($tb, [$collection, $sub_store]) SET
        collection_name = $collection,
        sub_store_name = $sub_store,
        routing_filter = $filter,
        status = status ?? 'pending',
        migrated_count = migrated_count ?? 0,
        total_count = total_count ?? 0,
        created_at = created_at ?? $now,
        updated_at = $now;
"#;

const MARK_MIGRATING: &str = r#"
    UPDATE type::thing($tb, [$collection, $sub_store]) SET
        status = 'migrating',
        total_count = $total,
        migrated_count = 0,
        error_message = NONE,
        started_at = $now,
        completed_at = NONE,
        updated_at = $now;
"#;

const UPDATE_PROGRESS: &str = r#"
    UPDATE type::thing($tb, [$collection, $sub_store]) SET
        migrated_count = $migrated,
        updated_at = $now
    WHERE migrated_count < $migrated;
"#;

const MARK_COMPLETED: &str = r#"
    UPDATE type::thing($tb, [$collection, $sub_store]) SET
        status = 'completed',
        migrated_count = $migrated,
        error_message = NONE,
        completed_at = $now,
        updated_at = $now;
"#;

const MARK_FAILED: &str = r#"
    UPDATE type::thing($tb, [$collection, $sub_store]) SET
        status = 'failed',
        error_message = $message,
        updated_at = $now;
"#;

const RESET: &str = r#"
    UPDATE type::thing($tb, [$collection, $sub_store]) SET
        status = 'pending',
        migrated_count = 0,
        total_count = 0,
        error_message = NONE,
        started_at = NONE,
        completed_at = NONE,
        updated_at = $now;
"#;

const SELECT_ONE: &str = "SELECT * FROM type::thing($tb, [$collection, $sub_store])";

const SELECT_ALL: &str =
    "SELECT * FROM type::table($tb) WHERE collection_name = $collection ORDER BY sub_store_name ASC";

/// SurrealDB-backed implementation of [`StatusTable`].
///
/// The table is created on first use.
pub struct SurrealStatusTable {
    handle: SurrealHandle,
    schema: OnceCell<()>,
}

impl SurrealStatusTable {
    pub fn new(handle: SurrealHandle) -> Self {
        Self {
            handle,
            schema: OnceCell::new(),
        }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StoreResult<Self> {
        Ok(Self::new(SurrealHandle::in_memory().await?))
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        self.schema
            .get_or_try_init(|| migrations::init_migrations_table(self.handle.db()))
            .await?;
        Ok(())
    }

    /// Statement addressed at one (collection, sub-store) row, with the
    /// shared bindings applied.
    fn keyed(&self, sql: &'static str, collection: &str, sub_store: &str) -> Query<'_, Any> {
        self.handle
            .db()
            .query(sql)
            .bind(("tb", MIGRATIONS_TABLE))
            .bind(("collection", collection.to_string()))
            .bind(("sub_store", sub_store.to_string()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
    }

    async fn run(&self, query: Query<'_, Any>) -> StoreResult<()> {
        query.await.and_then(|response| response.check())?;
        Ok(())
    }
}

#[async_trait]
impl StatusTable for SurrealStatusTable {
    async fn register(&self, collection: &str, sub_store: &str, filter: &Filters) -> StoreResult<()> {
        debug!(collection, sub_store, "registering sub-store");
        let filter = serde_json::to_string(filter)?;
        self.ensure_schema().await?;
        self.run(self.keyed(REGISTER, collection, sub_store).bind(("filter", filter)))
            .await
    }

    async fn mark_migrating(&self, collection: &str, sub_store: &str, total: u64) -> StoreResult<()> {
        self.ensure_schema().await?;
        self.run(self.keyed(MARK_MIGRATING, collection, sub_store).bind(("total", total)))
            .await
    }

    async fn update_progress(&self, collection: &str, sub_store: &str, migrated: u64) -> StoreResult<()> {
        self.ensure_schema().await?;
        self.run(self.keyed(UPDATE_PROGRESS, collection, sub_store).bind(("migrated", migrated)))
            .await
    }

    async fn mark_completed(&self, collection: &str, sub_store: &str, migrated: u64) -> StoreResult<()> {
        self.ensure_schema().await?;
        self.run(self.keyed(MARK_COMPLETED, collection, sub_store).bind(("migrated", migrated)))
            .await
    }

    async fn mark_failed(&self, collection: &str, sub_store: &str, message: &str) -> StoreResult<()> {
        self.ensure_schema().await?;
        let message = message.to_string();
        self.run(self.keyed(MARK_FAILED, collection, sub_store).bind(("message", message)))
            .await
    }

    async fn reset(&self, collection: &str, sub_store: &str) -> StoreResult<()> {
        self.ensure_schema().await?;
        self.run(self.keyed(RESET, collection, sub_store)).await
    }

    async fn fetch(&self, collection: &str, sub_store: &str) -> StoreResult<Option<MigrationRecord>> {
        self.ensure_schema().await?;
        let mut res = self.keyed(SELECT_ONE, collection, sub_store).await?;

        let rows: Vec<MigrationRow> = res.take(0)?;
        rows.into_iter().next().map(MigrationRow::into_record).transpose()
    }

    async fn fetch_all(&self, collection: &str) -> StoreResult<Vec<MigrationRecord>> {
        self.ensure_schema().await?;
        let mut res = self
            .handle
            .db()
            .query(SELECT_ALL)
            .bind(("tb", MIGRATIONS_TABLE))
            .bind(("collection", collection.to_string()))
            .await?;

        let rows: Vec<MigrationRow> = res.take(0)?;
        rows.into_iter().map(MigrationRow::into_record).collect()
    }
}
