//! In-memory fakes for storage traits
//!
//! Provides `MemoryVectorStore` and `MemoryStatusTable` that satisfy the trait
//! contracts without any external dependencies, plus `FailingVectorStore` and
//! `FailingStatusTable` for exercising failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::id::{IdGenerator, RecordId};
use crate::storage_traits::*;

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
}

// ---------------------------------------------------------------------------
// MemoryVectorStore
// ---------------------------------------------------------------------------

/// In-memory collection backed by a `Vec<Record>` in insertion order.
pub struct MemoryVectorStore {
    name: String,
    dimension: usize,
    ids: Arc<IdGenerator>,
    records: Mutex<Vec<Record>>,
    status: Option<Arc<MemoryStatusTable>>,
}

impl MemoryVectorStore {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self::with_ids(name, dimension, Arc::new(IdGenerator::with_random_worker()))
    }

    /// Share an id generator with other stores.
    pub fn with_ids(name: impl Into<String>, dimension: usize, ids: Arc<IdGenerator>) -> Self {
        Self {
            name: name.into(),
            dimension,
            ids,
            records: Mutex::new(Vec::new()),
            status: None,
        }
    }

    /// Expose `table` as this store's bookkeeping capability.
    pub fn with_status_table(mut self, table: Arc<MemoryStatusTable>) -> Self {
        self.status = Some(table);
        self
    }

    fn filtered(&self, filters: Option<&Filters>) -> StoreResult<Vec<Record>> {
        let records = lock(&self.records)?;
        Ok(records
            .iter()
            .filter(|r| filters.map(|f| matches_filters(&r.payload, f)).unwrap_or(true))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn create_collection(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert(&self, vectors: &[Vec<f32>], payloads: &[Payload]) -> StoreResult<Vec<RecordId>> {
        validate_batch(vectors, payloads, self.dimension)?;
        let mut records = lock(&self.records)?;
        let ids = self.ids.next_ids(vectors.len());
        records.extend(
            ids.iter()
                .zip(vectors.iter().zip(payloads.iter()))
                .map(|(id, (vector, payload))| Record {
                    id: *id,
                    vector: vector.clone(),
                    payload: payload.clone(),
                }),
        );
        Ok(ids)
    }

    async fn get(&self, id: RecordId) -> StoreResult<Option<Record>> {
        let records = lock(&self.records)?;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn update(
        &self,
        id: RecordId,
        vector: Option<Vec<f32>>,
        payload: Option<Payload>,
    ) -> StoreResult<bool> {
        if let Some(v) = &vector {
            validate_vector(v, self.dimension)?;
        }
        let mut records = lock(&self.records)?;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if let Some(v) = vector {
            record.vector = v;
        }
        if let Some(p) = payload {
            record.payload = p;
        }
        Ok(true)
    }

    async fn delete(&self, id: RecordId) -> StoreResult<bool> {
        let mut records = lock(&self.records)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn list(
        &self,
        filters: Option<&Filters>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        let mut records = self.filtered(filters)?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> StoreResult<Vec<ScoredRecord>> {
        validate_vector(query, self.dimension)?;
        Ok(rank(self.filtered(filters)?, query, limit))
    }

    async fn collection_info(&self) -> StoreResult<CollectionInfo> {
        let records = lock(&self.records)?;
        Ok(CollectionInfo {
            name: self.name.clone(),
            record_count: records.len() as u64,
            location: format!("memory://{}", self.name),
        })
    }

    async fn reset(&self) -> StoreResult<()> {
        lock(&self.records)?.clear();
        Ok(())
    }

    fn status_table(&self) -> Option<Arc<dyn StatusTable>> {
        self.status
            .clone()
            .map(|table| table as Arc<dyn StatusTable>)
    }
}

// ---------------------------------------------------------------------------
// FailingVectorStore
// ---------------------------------------------------------------------------

/// Delegating store whose inserts fail once `fail_after` records have been
/// accepted. Reads (`get`, `list`, `search`) fail while
/// [`fail_reads`](Self::fail_reads) is switched on. Everything else passes
/// through.
pub struct FailingVectorStore {
    inner: Arc<dyn VectorStore>,
    fail_after: usize,
    accepted: AtomicUsize,
    reads_failing: AtomicBool,
}

impl FailingVectorStore {
    pub fn new(inner: Arc<dyn VectorStore>, fail_after: usize) -> Self {
        Self {
            inner,
            fail_after,
            accepted: AtomicUsize::new(0),
            reads_failing: AtomicBool::new(false),
        }
    }

    pub fn fail_reads(&self, on: bool) {
        self.reads_failing.store(on, Ordering::SeqCst);
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.reads_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Storage(format!(
                "injected read failure on '{}'",
                self.inner.name()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FailingVectorStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn create_collection(&self) -> StoreResult<()> {
        self.inner.create_collection().await
    }

    async fn insert(&self, vectors: &[Vec<f32>], payloads: &[Payload]) -> StoreResult<Vec<RecordId>> {
        let accepted = self.accepted.load(Ordering::SeqCst);
        if accepted.saturating_add(vectors.len()) > self.fail_after {
            return Err(StoreError::Storage(format!(
                "injected failure after {} records",
                accepted
            )));
        }
        let ids = self.inner.insert(vectors, payloads).await?;
        self.accepted.fetch_add(ids.len(), Ordering::SeqCst);
        Ok(ids)
    }

    async fn get(&self, id: RecordId) -> StoreResult<Option<Record>> {
        self.check_read()?;
        self.inner.get(id).await
    }

    async fn update(
        &self,
        id: RecordId,
        vector: Option<Vec<f32>>,
        payload: Option<Payload>,
    ) -> StoreResult<bool> {
        self.inner.update(id, vector, payload).await
    }

    async fn delete(&self, id: RecordId) -> StoreResult<bool> {
        self.inner.delete(id).await
    }

    async fn list(
        &self,
        filters: Option<&Filters>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        self.check_read()?;
        self.inner.list(filters, limit).await
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> StoreResult<Vec<ScoredRecord>> {
        self.check_read()?;
        self.inner.search(query, limit, filters).await
    }

    async fn collection_info(&self) -> StoreResult<CollectionInfo> {
        self.inner.collection_info().await
    }

    async fn reset(&self) -> StoreResult<()> {
        self.inner.reset().await
    }

    fn status_table(&self) -> Option<Arc<dyn StatusTable>> {
        self.inner.status_table()
    }
}

// ---------------------------------------------------------------------------
// MemoryStatusTable
// ---------------------------------------------------------------------------

/// In-memory migration bookkeeping backed by a `HashMap<(collection, sub_store), MigrationRecord>`.
#[derive(Debug, Default)]
pub struct MemoryStatusTable {
    rows: Mutex<HashMap<(String, String), MigrationRecord>>,
}

impl MemoryStatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to an existing row; unregistered pairs are left alone.
    fn modify<F>(&self, collection: &str, sub_store: &str, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut MigrationRecord),
    {
        let mut rows = lock(&self.rows)?;
        if let Some(row) = rows.get_mut(&(collection.to_string(), sub_store.to_string())) {
            f(row);
            row.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl StatusTable for MemoryStatusTable {
    async fn register(&self, collection: &str, sub_store: &str, filter: &Filters) -> StoreResult<()> {
        let now = Utc::now();
        let mut rows = lock(&self.rows)?;
        rows.entry((collection.to_string(), sub_store.to_string()))
            .and_modify(|row| {
                row.routing_filter = filter.clone();
                row.updated_at = now;
            })
            .or_insert_with(|| MigrationRecord {
                collection_name: collection.to_string(),
                sub_store_name: sub_store.to_string(),
                status: MigrationStatus::Pending,
                migrated_count: 0,
                total_count: 0,
                error_message: None,
                routing_filter: filter.clone(),
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
            });
        Ok(())
    }

    async fn mark_migrating(&self, collection: &str, sub_store: &str, total: u64) -> StoreResult<()> {
        self.modify(collection, sub_store, |row| {
            row.status = MigrationStatus::Migrating;
            row.total_count = total;
            row.migrated_count = 0;
            row.error_message = None;
            row.started_at = Some(Utc::now());
            row.completed_at = None;
        })
    }

    async fn update_progress(&self, collection: &str, sub_store: &str, migrated: u64) -> StoreResult<()> {
        self.modify(collection, sub_store, |row| {
            row.migrated_count = row.migrated_count.max(migrated);
        })
    }

    async fn mark_completed(&self, collection: &str, sub_store: &str, migrated: u64) -> StoreResult<()> {
        self.modify(collection, sub_store, |row| {
            row.status = MigrationStatus::Completed;
            row.migrated_count = migrated;
            row.error_message = None;
            row.completed_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, collection: &str, sub_store: &str, message: &str) -> StoreResult<()> {
        self.modify(collection, sub_store, |row| {
            row.status = MigrationStatus::Failed;
            row.error_message = Some(message.to_string());
        })
    }

    async fn reset(&self, collection: &str, sub_store: &str) -> StoreResult<()> {
        self.modify(collection, sub_store, |row| {
            row.status = MigrationStatus::Pending;
            row.migrated_count = 0;
            row.total_count = 0;
            row.error_message = None;
            row.started_at = None;
            row.completed_at = None;
        })
    }

    async fn fetch(&self, collection: &str, sub_store: &str) -> StoreResult<Option<MigrationRecord>> {
        let rows = lock(&self.rows)?;
        Ok(rows
            .get(&(collection.to_string(), sub_store.to_string()))
            .cloned())
    }

    async fn fetch_all(&self, collection: &str) -> StoreResult<Vec<MigrationRecord>> {
        let rows = lock(&self.rows)?;
        let mut records: Vec<MigrationRecord> = rows
            .values()
            .filter(|row| row.collection_name == collection)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.sub_store_name.cmp(&b.sub_store_name));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// FailingStatusTable
// ---------------------------------------------------------------------------

/// Bookkeeping table whose every call fails with a storage error.
#[derive(Debug, Default)]
pub struct FailingStatusTable;

impl FailingStatusTable {
    pub fn new() -> Self {
        Self
    }
}

fn unavailable<T>() -> StoreResult<T> {
    Err(StoreError::Storage("status table unavailable".to_string()))
}

#[async_trait]
impl StatusTable for FailingStatusTable {
    async fn register(&self, _collection: &str, _sub_store: &str, _filter: &Filters) -> StoreResult<()> {
        unavailable()
    }

    async fn mark_migrating(&self, _collection: &str, _sub_store: &str, _total: u64) -> StoreResult<()> {
        unavailable()
    }

    async fn update_progress(&self, _collection: &str, _sub_store: &str, _migrated: u64) -> StoreResult<()> {
        unavailable()
    }

    async fn mark_completed(&self, _collection: &str, _sub_store: &str, _migrated: u64) -> StoreResult<()> {
        unavailable()
    }

    async fn mark_failed(&self, _collection: &str, _sub_store: &str, _message: &str) -> StoreResult<()> {
        unavailable()
    }

    async fn reset(&self, _collection: &str, _sub_store: &str) -> StoreResult<()> {
        unavailable()
    }

    async fn fetch(&self, _collection: &str, _sub_store: &str) -> StoreResult<Option<MigrationRecord>> {
        unavailable()
    }

    async fn fetch_all(&self, _collection: &str) -> StoreResult<Vec<MigrationRecord>> {
        unavailable()
    }
}
