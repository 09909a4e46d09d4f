//! SurrealDB-backed VectorStore implementation
//!
//! Uses `schema::MemoryRow` for persistence, converting to/from
//! `storage_traits::Record` at the boundary. Filtering and cosine ranking run
//! in-process over rows fetched in `record_id` order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::handle::SurrealHandle;
use crate::id::{IdGenerator, RecordId};
use crate::migrations;
use crate::schema::{CountRow, MemoryPatch, MemoryRow, RecordIdRow};
use crate::storage_traits::{
    matches_filters, rank, validate_batch, validate_collection_name, validate_vector,
    CollectionInfo, Filters, Payload, Record, ScoredRecord, StatusTable, StoreResult, VectorStore,
};
use crate::surreal_status::SurrealStatusTable;

const SELECT_ROWS: &str =
    "SELECT record_id, vector, payload, created_at FROM type::table($tb) ORDER BY record_id ASC";

const SELECT_ONE: &str =
    "SELECT record_id, vector, payload, created_at FROM type::table($tb) WHERE record_id = $id";

const INSERT_ROWS: &str = r#"
    BEGIN TRANSACTION;
    FOR $row IN $rows {
        CREATE type::table($tb) CONTENT $row;
    };
    COMMIT TRANSACTION;
"#;

const UPDATE_ROW: &str = "UPDATE type::table($tb) MERGE $patch WHERE record_id = $id";

const DELETE_ROW: &str = "DELETE type::table($tb) WHERE record_id = $id RETURN BEFORE";

const COUNT_ROWS: &str = "SELECT count() AS count FROM type::table($tb) GROUP ALL";

/// SurrealDB-backed implementation of [`VectorStore`] for one collection.
///
/// Every operation runs under one per-instance lock, so writes are
/// serialized and reads see all prior writes made through this instance.
pub struct SurrealVectorStore {
    handle: SurrealHandle,
    name: String,
    dimension: usize,
    ids: Arc<IdGenerator>,
    lock: Mutex<()>,
    status: Arc<SurrealStatusTable>,
}

impl SurrealVectorStore {
    /// Bind a store to `name` without touching the database.
    pub fn new(
        handle: SurrealHandle,
        name: impl Into<String>,
        dimension: usize,
        ids: Arc<IdGenerator>,
    ) -> StoreResult<Self> {
        let name = name.into();
        validate_collection_name(&name)?;
        if dimension == 0 {
            return Err(StoreError::Validation(format!(
                "collection '{name}' must have a non-zero dimension"
            )));
        }
        let status = Arc::new(SurrealStatusTable::new(handle.clone()));
        Ok(Self {
            handle,
            name,
            dimension,
            ids,
            lock: Mutex::new(()),
            status,
        })
    }

    /// Bind a store and create its table.
    pub async fn open(
        handle: SurrealHandle,
        name: impl Into<String>,
        dimension: usize,
        ids: Arc<IdGenerator>,
    ) -> StoreResult<Self> {
        let store = Self::new(handle, name, dimension, ids)?;
        store.create_collection().await?;
        Ok(store)
    }

    /// In-memory instance for testing.
    pub async fn in_memory(name: impl Into<String>, dimension: usize) -> StoreResult<Self> {
        let handle = SurrealHandle::in_memory().await?;
        Self::open(handle, name, dimension, Arc::new(IdGenerator::with_random_worker())).await
    }

    pub fn handle(&self) -> &SurrealHandle {
        &self.handle
    }

    // -- private helpers -----------------------------------------------------

    /// All rows in record-id order. Caller holds the lock.
    async fn fetch_all(&self) -> StoreResult<Vec<Record>> {
        let mut res = self
            .handle
            .db()
            .query(SELECT_ROWS)
            .bind(("tb", self.name.clone()))
            .await?;

        let rows: Vec<MemoryRow> = res.take(0)?;
        rows.into_iter().map(MemoryRow::into_record).collect()
    }

    /// One row by id. Caller holds the lock.
    async fn fetch_one(&self, id: RecordId) -> StoreResult<Option<Record>> {
        let Ok(rid) = i64::try_from(id.0) else {
            return Ok(None);
        };
        let mut res = self
            .handle
            .db()
            .query(SELECT_ONE)
            .bind(("tb", self.name.clone()))
            .bind(("id", rid))
            .await?;

        let rows: Vec<MemoryRow> = res.take(0)?;
        rows.into_iter().next().map(MemoryRow::into_record).transpose()
    }

    async fn filtered(&self, filters: Option<&Filters>) -> StoreResult<Vec<Record>> {
        let rows = self.fetch_all().await?;
        Ok(match filters {
            Some(f) if !f.is_empty() => rows
                .into_iter()
                .filter(|r| matches_filters(&r.payload, f))
                .collect(),
            _ => rows,
        })
    }
}

#[async_trait]
impl VectorStore for SurrealVectorStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    #[instrument(skip(self), fields(collection = %self.name))]
    async fn create_collection(&self) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        migrations::init_collection_table(self.handle.db(), &self.name).await
    }

    #[instrument(skip(self, vectors, payloads), fields(collection = %self.name, count = vectors.len()))]
    async fn insert(&self, vectors: &[Vec<f32>], payloads: &[Payload]) -> StoreResult<Vec<RecordId>> {
        validate_batch(vectors, payloads, self.dimension)?;
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.lock.lock().await;
        let ids = self.ids.next_ids(vectors.len());
        let rows = ids
            .iter()
            .zip(vectors.iter().zip(payloads.iter()))
            .map(|(id, (vector, payload))| MemoryRow::new(*id, vector, payload))
            .collect::<StoreResult<Vec<_>>>()?;

        self.handle
            .db()
            .query(INSERT_ROWS)
            .bind(("tb", self.name.clone()))
            .bind(("rows", rows))
            .await
            .and_then(|response| response.check())?;

        debug!(inserted = ids.len(), "records inserted");
        Ok(ids)
    }

    #[instrument(skip(self), fields(collection = %self.name))]
    async fn get(&self, id: RecordId) -> StoreResult<Option<Record>> {
        let _guard = self.lock.lock().await;
        self.fetch_one(id).await
    }

    #[instrument(skip(self, vector, payload), fields(collection = %self.name))]
    async fn update(
        &self,
        id: RecordId,
        vector: Option<Vec<f32>>,
        payload: Option<Payload>,
    ) -> StoreResult<bool> {
        if let Some(v) = &vector {
            validate_vector(v, self.dimension)?;
        }
        let patch = MemoryPatch::new(vector.as_deref(), payload.as_ref())?;

        let _guard = self.lock.lock().await;
        if self.fetch_one(id).await?.is_none() {
            debug!(%id, "update of unknown record ignored");
            return Ok(false);
        }
        if patch.is_empty() {
            return Ok(true);
        }

        self.handle
            .db()
            .query(UPDATE_ROW)
            .bind(("tb", self.name.clone()))
            .bind(("patch", patch))
            .bind(("id", id.0 as i64))
            .await
            .and_then(|response| response.check())?;
        Ok(true)
    }

    #[instrument(skip(self), fields(collection = %self.name))]
    async fn delete(&self, id: RecordId) -> StoreResult<bool> {
        let Ok(rid) = i64::try_from(id.0) else {
            return Ok(false);
        };

        let _guard = self.lock.lock().await;
        let mut res = self
            .handle
            .db()
            .query(DELETE_ROW)
            .bind(("tb", self.name.clone()))
            .bind(("id", rid))
            .await?;

        let removed: Vec<RecordIdRow> = res.take(0)?;
        Ok(!removed.is_empty())
    }

    #[instrument(skip(self, filters), fields(collection = %self.name))]
    async fn list(
        &self,
        filters: Option<&Filters>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        let _guard = self.lock.lock().await;
        let mut records = self.filtered(filters).await?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    #[instrument(skip(self, query, filters), fields(collection = %self.name))]
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> StoreResult<Vec<ScoredRecord>> {
        validate_vector(query, self.dimension)?;

        let _guard = self.lock.lock().await;
        let candidates = self.filtered(filters).await?;
        Ok(rank(candidates, query, limit))
    }

    async fn collection_info(&self) -> StoreResult<CollectionInfo> {
        let _guard = self.lock.lock().await;
        let mut res = self
            .handle
            .db()
            .query(COUNT_ROWS)
            .bind(("tb", self.name.clone()))
            .await?;

        let counts: Vec<CountRow> = res.take(0)?;
        Ok(CollectionInfo {
            name: self.name.clone(),
            record_count: counts.first().map(|c| c.count).unwrap_or(0),
            location: format!("{}/{}", self.handle.location(), self.name),
        })
    }

    #[instrument(skip(self), fields(collection = %self.name))]
    async fn reset(&self) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        migrations::drop_collection_table(self.handle.db(), &self.name).await?;
        migrations::init_collection_table(self.handle.db(), &self.name).await?;
        info!("collection reset");
        Ok(())
    }

    fn status_table(&self) -> Option<Arc<dyn StatusTable>> {
        Some(self.status.clone())
    }
}
