//! Storage trait definitions for Mnemo
//!
//! These traits define the core storage abstractions:
//! - `VectorStore`: one collection of embedding records (insert, lookup,
//!   filtered list, filtered similarity search)
//! - `StatusTable`: durable migration bookkeeping, an optional capability a
//!   backend may expose through `VectorStore::status_table`
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module; the SurrealDB reference backend lives in
//! `surreal_store` and `surreal_status`.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::error::StoreError;
use crate::id::RecordId;

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Record metadata: arbitrary JSON-compatible values keyed by field name.
pub type Payload = serde_json::Map<String, Value>;

/// Conjunction of exact-match constraints on payload fields.
pub type Filters = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A stored memory: embedding plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

/// Summary of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub record_count: u64,
    pub location: String,
}

/// True when every filter key is present in `payload` with an equal value.
pub fn matches_filters(payload: &Payload, filters: &Filters) -> bool {
    filters
        .iter()
        .all(|(key, expected)| payload.get(key) == Some(expected))
}

/// Cosine similarity. Zero-magnitude input yields 0 instead of NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Score `candidates` against `query` and keep the best `limit`.
///
/// The sort is stable, so equal scores keep the order in which candidates
/// were supplied.
pub fn rank<I>(candidates: I, query: &[f32], limit: usize) -> Vec<ScoredRecord>
where
    I: IntoIterator<Item = Record>,
{
    let mut scored: Vec<ScoredRecord> = candidates
        .into_iter()
        .map(|record| {
            let score = cosine_similarity(query, &record.vector);
            ScoredRecord { record, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Check one vector against the collection dimension.
pub fn validate_vector(vector: &[f32], dimension: usize) -> StoreResult<()> {
    if vector.len() != dimension {
        return Err(StoreError::Validation(format!(
            "vector has {} dimensions, collection expects {}",
            vector.len(),
            dimension
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::Validation(
            "vector contains a non-finite component".to_string(),
        ));
    }
    Ok(())
}

/// Check an insert batch before any I/O.
pub fn validate_batch(vectors: &[Vec<f32>], payloads: &[Payload], dimension: usize) -> StoreResult<()> {
    if vectors.len() != payloads.len() {
        return Err(StoreError::Validation(format!(
            "{} vectors but {} payloads",
            vectors.len(),
            payloads.len()
        )));
    }
    vectors
        .iter()
        .try_for_each(|vector| validate_vector(vector, dimension))
}

/// Check a collection name is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
///
/// Backends that address tables by name only accept validated identifiers.
pub fn validate_collection_name(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_head
        || name.len() > 64
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StoreError::Validation(format!(
            "invalid collection name '{name}': expected [A-Za-z_][A-Za-z0-9_]*, at most 64 chars"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ContentDigest: record fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 over the canonical JSON of a record's vector and payload.
///
/// Ids differ between copies of a record, the digest does not; the migrator
/// uses it to recognise records already present in a sub-store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn of(vector: &[f32], payload: &Payload) -> Self {
        use sha2::Digest;
        let canonical = canonicalize(&serde_json::json!({ "payload": payload, "vector": vector }));
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn of_record(record: &Record) -> Self {
        Self::of(&record.vector, &record.payload)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

/// Rebuild every object with keys inserted in sorted order, so the encoding
/// is stable even when `serde_json/preserve_order` is enabled.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// VectorStore: one collection
// ---------------------------------------------------------------------------

/// Durable storage and retrieval of records for one collection.
///
/// Guarantees:
/// - `insert` validates the whole batch before I/O and is all-or-nothing.
/// - Returned ids follow input order.
/// - `get` / `update` / `delete` on an unknown id are not errors.
/// - `search` ranks by descending cosine similarity; equal scores keep the
///   backend's natural (insertion) order.
/// - Backend failures surface as `StoreError::is_storage()` errors and are
///   never swallowed.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Agreed vector dimensionality.
    fn dimension(&self) -> usize;

    /// Create the underlying storage if absent. Idempotent.
    async fn create_collection(&self) -> StoreResult<()>;

    /// Insert records, returning fresh ids in input order. Empty input is a no-op.
    async fn insert(&self, vectors: &[Vec<f32>], payloads: &[Payload]) -> StoreResult<Vec<RecordId>>;

    /// Exact lookup.
    async fn get(&self, id: RecordId) -> StoreResult<Option<Record>>;

    /// Partial update. Returns `false` (no-op) for an unknown id.
    async fn update(
        &self,
        id: RecordId,
        vector: Option<Vec<f32>>,
        payload: Option<Payload>,
    ) -> StoreResult<bool>;

    /// Remove a record. Returns `false` (no-op) for an unknown id.
    async fn delete(&self, id: RecordId) -> StoreResult<bool>;

    /// Records matching every filter, in natural order, bounded by `limit`.
    async fn list(&self, filters: Option<&Filters>, limit: Option<usize>)
        -> StoreResult<Vec<Record>>;

    /// Up to `limit` records matching `filters`, best match first.
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> StoreResult<Vec<ScoredRecord>>;

    /// Name, record count and storage location.
    async fn collection_info(&self) -> StoreResult<CollectionInfo>;

    /// Drop and recreate the collection, discarding every record.
    async fn reset(&self) -> StoreResult<()>;

    /// Migration bookkeeping capability. Backends without ad hoc query
    /// support return `None`.
    fn status_table(&self) -> Option<Arc<dyn StatusTable>> {
        None
    }
}

// ---------------------------------------------------------------------------
// StatusTable: migration bookkeeping
// ---------------------------------------------------------------------------

/// Migration state of one sub-store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Migrating,
    Completed,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Migrating => "migrating",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MigrationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MigrationStatus::Pending),
            "migrating" => Ok(MigrationStatus::Migrating),
            "completed" => Ok(MigrationStatus::Completed),
            "failed" => Ok(MigrationStatus::Failed),
            other => Err(StoreError::Serialization(format!(
                "unknown migration status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per (main collection, sub-store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub collection_name: String,
    pub sub_store_name: String,
    pub status: MigrationStatus,
    pub migrated_count: u64,
    pub total_count: u64,
    pub error_message: Option<String>,
    pub routing_filter: Filters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Durable migration bookkeeping shared across processes.
///
/// Guarantees:
/// - `(collection, sub_store)` identifies at most one row.
/// - `register` is an atomic upsert that never changes an existing status.
/// - `update_progress` never lowers `migrated_count`.
/// - Status-changing calls on an unregistered pair are no-ops.
#[async_trait]
pub trait StatusTable: Send + Sync {
    /// Create a `pending` row, or refresh filter and `updated_at` of an existing one.
    async fn register(&self, collection: &str, sub_store: &str, filter: &Filters)
        -> StoreResult<()>;

    /// `status = migrating`, record `total`, zero the running count, stamp `started_at`.
    async fn mark_migrating(&self, collection: &str, sub_store: &str, total: u64)
        -> StoreResult<()>;

    /// Raise `migrated_count` to `migrated` if it is higher.
    async fn update_progress(&self, collection: &str, sub_store: &str, migrated: u64)
        -> StoreResult<()>;

    /// `status = completed`, stamp `completed_at`, clear the error.
    async fn mark_completed(&self, collection: &str, sub_store: &str, migrated: u64)
        -> StoreResult<()>;

    /// `status = failed` with `message`; counters are left as they are.
    async fn mark_failed(&self, collection: &str, sub_store: &str, message: &str)
        -> StoreResult<()>;

    /// Back to `pending` with counters, timestamps and error cleared.
    async fn reset(&self, collection: &str, sub_store: &str) -> StoreResult<()>;

    async fn fetch(&self, collection: &str, sub_store: &str)
        -> StoreResult<Option<MigrationRecord>>;

    /// All rows of one main collection, ordered by sub-store name.
    async fn fetch_all(&self, collection: &str) -> StoreResult<Vec<MigrationRecord>>;
}
