//! Migration status store
//!
//! Bookkeeping front for one main collection. Wraps an optional
//! [`StatusTable`] capability:
//!
//! - With a table, every call is forwarded. Persistence failures are logged
//!   and swallowed: a lost status update is recoverable by `reset` or a
//!   re-run, failing the operation it describes is not.
//! - Without one (backend has no ad hoc query support) the store is
//!   *degraded*: writes do nothing and every sub-store reports not ready, so
//!   all traffic stays on the main collection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage_traits::{Filters, MigrationRecord, MigrationStatus, StatusTable, VectorStore};

/// Progress derived from a migration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub sub_store: String,
    pub status: MigrationStatus,
    pub migrated_count: u64,
    pub total_count: u64,
    /// `migrated / total * 100`, or 0 when `total` is 0
    pub percentage: f64,
    /// From `started_at` to `completed_at`, to the last update for a failed
    /// run, or to now while migrating; 0 if never started
    pub elapsed_ms: u64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationProgress {
    pub fn from_record(record: &MigrationRecord, now: DateTime<Utc>) -> Self {
        let percentage = if record.total_count > 0 {
            record.migrated_count as f64 / record.total_count as f64 * 100.0
        } else {
            0.0
        };
        let elapsed_ms = match (record.started_at, record.completed_at) {
            (Some(start), Some(end)) if end >= start => (end - start).num_milliseconds(),
            (Some(start), _) => match record.status {
                MigrationStatus::Migrating => (now - start).num_milliseconds(),
                MigrationStatus::Failed => (record.updated_at - start).num_milliseconds(),
                _ => 0,
            },
            _ => 0,
        };

        MigrationProgress {
            sub_store: record.sub_store_name.clone(),
            status: record.status,
            migrated_count: record.migrated_count,
            total_count: record.total_count,
            percentage,
            elapsed_ms: elapsed_ms.max(0) as u64,
            error_message: record.error_message.clone(),
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}

/// Migration bookkeeping for the sub-stores of one main collection.
#[derive(Clone)]
pub struct MigrationStatusStore {
    collection: String,
    table: Option<Arc<dyn StatusTable>>,
}

impl MigrationStatusStore {
    pub fn new(collection: impl Into<String>, table: Option<Arc<dyn StatusTable>>) -> Self {
        let collection = collection.into();
        if table.is_none() {
            warn!(
                collection = %collection,
                "backend has no status table; sub-stores will never be routed to"
            );
        }
        Self { collection, table }
    }

    /// Use the bookkeeping capability of `backend`, checked once here.
    pub fn for_backend(backend: &dyn VectorStore) -> Self {
        Self::new(backend.name(), backend.status_table())
    }

    /// A store that records nothing and reports every sub-store not ready.
    pub fn degraded(collection: impl Into<String>) -> Self {
        Self::new(collection, None)
    }

    pub fn is_degraded(&self) -> bool {
        self.table.is_none()
    }

    /// Main collection this store keeps records for.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn register(&self, sub_store: &str, filter: &Filters) {
        let Some(table) = &self.table else { return };
        match table.register(&self.collection, sub_store, filter).await {
            Ok(()) => info!(collection = %self.collection, sub_store, "sub-store registered"),
            Err(e) => warn!(collection = %self.collection, sub_store, error = %e, "register failed"),
        }
    }

    pub async fn mark_migrating(&self, sub_store: &str, total_count: u64) {
        let Some(table) = &self.table else { return };
        if let Err(e) = table
            .mark_migrating(&self.collection, sub_store, total_count)
            .await
        {
            warn!(collection = %self.collection, sub_store, error = %e, "mark_migrating failed");
        }
    }

    pub async fn update_progress(&self, sub_store: &str, migrated_count: u64) {
        let Some(table) = &self.table else { return };
        match table
            .update_progress(&self.collection, sub_store, migrated_count)
            .await
        {
            Ok(()) => debug!(sub_store, migrated_count, "migration progress"),
            Err(e) => {
                warn!(collection = %self.collection, sub_store, error = %e, "update_progress failed")
            }
        }
    }

    pub async fn mark_completed(&self, sub_store: &str, migrated_count: u64) {
        let Some(table) = &self.table else { return };
        if let Err(e) = table
            .mark_completed(&self.collection, sub_store, migrated_count)
            .await
        {
            warn!(collection = %self.collection, sub_store, error = %e, "mark_completed failed");
        }
    }

    pub async fn mark_failed(&self, sub_store: &str, error_message: &str) {
        let Some(table) = &self.table else { return };
        if let Err(e) = table
            .mark_failed(&self.collection, sub_store, error_message)
            .await
        {
            warn!(collection = %self.collection, sub_store, error = %e, "mark_failed failed");
        }
    }

    /// Back to `pending` with counters and timestamps cleared.
    pub async fn reset(&self, sub_store: &str) {
        let Some(table) = &self.table else { return };
        match table.reset(&self.collection, sub_store).await {
            Ok(()) => info!(collection = %self.collection, sub_store, "migration status reset"),
            Err(e) => warn!(collection = %self.collection, sub_store, error = %e, "reset failed"),
        }
    }

    /// True iff the sub-store's migration is `completed`.
    pub async fn is_ready(&self, sub_store: &str) -> bool {
        self.get_status(sub_store)
            .await
            .map(|record| record.status == MigrationStatus::Completed)
            .unwrap_or(false)
    }

    pub async fn get_status(&self, sub_store: &str) -> Option<MigrationRecord> {
        let table = self.table.as_ref()?;
        match table.fetch(&self.collection, sub_store).await {
            Ok(record) => record,
            Err(e) => {
                warn!(collection = %self.collection, sub_store, error = %e, "status read failed");
                None
            }
        }
    }

    pub async fn get_progress(&self, sub_store: &str) -> Option<MigrationProgress> {
        self.get_status(sub_store)
            .await
            .map(|record| MigrationProgress::from_record(&record, Utc::now()))
    }

    /// Every migration record of this main collection, by sub-store name.
    pub async fn list_all(&self) -> Vec<MigrationRecord> {
        let Some(table) = &self.table else {
            return Vec::new();
        };
        match table.fetch_all(&self.collection).await {
            Ok(records) => records,
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "status listing failed");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for MigrationStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStatusStore")
            .field("collection", &self.collection)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FailingStatusTable, MemoryStatusTable, MemoryVectorStore};
    use chrono::Duration;
    use serde_json::json;

    fn working_filter() -> Filters {
        json!({"memory_type": "working"}).as_object().cloned().unwrap()
    }

    fn store() -> MigrationStatusStore {
        MigrationStatusStore::new("memories", Some(Arc::new(MemoryStatusTable::new())))
    }

    #[tokio::test]
    async fn fresh_sub_store_is_pending_and_not_ready() {
        let status = store();
        status.register("working", &working_filter()).await;

        let record = status.get_status("working").await.unwrap();
        assert_eq!(record.status, MigrationStatus::Pending);
        assert_eq!(record.routing_filter, working_filter());
        assert!(!status.is_ready("working").await);
    }

    #[tokio::test]
    async fn progress_percentage_and_elapsed() {
        let start = Utc::now();
        let record = MigrationRecord {
            collection_name: "memories".into(),
            sub_store_name: "working".into(),
            status: MigrationStatus::Completed,
            migrated_count: 3,
            total_count: 4,
            error_message: None,
            routing_filter: working_filter(),
            created_at: start,
            updated_at: start,
            started_at: Some(start),
            completed_at: Some(start + Duration::milliseconds(1500)),
        };
        let progress = MigrationProgress::from_record(&record, Utc::now());
        assert_eq!(progress.percentage, 75.0);
        assert_eq!(progress.elapsed_ms, 1500);
    }

    #[test]
    fn failed_run_reports_time_until_failure() {
        let start = Utc::now() - Duration::seconds(60);
        let record = MigrationRecord {
            collection_name: "memories".into(),
            sub_store_name: "working".into(),
            status: MigrationStatus::Failed,
            migrated_count: 1,
            total_count: 4,
            error_message: Some("disk full".into()),
            routing_filter: working_filter(),
            created_at: start,
            updated_at: start + Duration::milliseconds(2500),
            started_at: Some(start),
            completed_at: None,
        };
        let progress = MigrationProgress::from_record(&record, Utc::now());
        assert_eq!(progress.elapsed_ms, 2500);
        assert_eq!(progress.percentage, 25.0);
    }

    #[tokio::test]
    async fn persistence_failures_are_swallowed() {
        let status =
            MigrationStatusStore::new("memories", Some(Arc::new(FailingStatusTable::new())));
        assert!(!status.is_degraded());

        status.register("working", &working_filter()).await;
        status.mark_migrating("working", 2).await;
        status.update_progress("working", 1).await;
        status.mark_completed("working", 2).await;
        status.mark_failed("working", "boom").await;
        status.reset("working").await;

        assert!(!status.is_ready("working").await);
        assert!(status.get_status("working").await.is_none());
        assert!(status.get_progress("working").await.is_none());
        assert!(status.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn zero_total_reports_zero_percent() {
        let status = store();
        status.register("working", &working_filter()).await;
        status.mark_migrating("working", 0).await;

        let progress = status.get_progress("working").await.unwrap();
        assert_eq!(progress.percentage, 0.0);
        assert_eq!(progress.status, MigrationStatus::Migrating);
    }

    #[tokio::test]
    async fn degraded_store_never_reports_ready() {
        let backend = MemoryVectorStore::new("memories", 3);
        let status = MigrationStatusStore::for_backend(&backend);
        assert!(status.is_degraded());

        status.register("working", &working_filter()).await;
        status.mark_migrating("working", 1).await;
        status.mark_completed("working", 1).await;

        assert!(!status.is_ready("working").await);
        assert!(status.get_status("working").await.is_none());
        assert!(status.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn capability_is_picked_up_from_backend() {
        let backend = MemoryVectorStore::new("memories", 3)
            .with_status_table(Arc::new(MemoryStatusTable::new()));
        let status = MigrationStatusStore::for_backend(&backend);
        assert!(!status.is_degraded());
        assert_eq!(status.collection(), "memories");
    }
}
