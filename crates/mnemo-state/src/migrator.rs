//! Bulk transfer of routed records from the main collection into a sub-store
//!
//! A run lists every main-collection record matching the sub-store's routing
//! filter and copies it across in batches. Target records are counted by
//! content digest and each one accounts for at most one matching source
//! record, so re-running a failed or interrupted migration never duplicates
//! records while identical source records still get one copy each. With
//! `delete_source`, only records now present in the target are removed from
//! the main collection.
//!
//! A degraded status store can never mark the sub-store ready, so nothing
//! would ever route to the copies; migration is refused before any I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::error::StoreError;
use crate::router::SubStore;
use crate::status::MigrationStatusStore;
use crate::storage_traits::{ContentDigest, Record, StoreResult, VectorStore};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Outcome of one successful migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub sub_store: String,
    /// Matching records found in the main collection
    pub total_count: u64,
    /// Matching records now present in the sub-store (copied or already there)
    pub migrated_count: u64,
    /// Records skipped because an unclaimed copy was already in the sub-store
    pub skipped_existing: u64,
    pub deleted_from_source: u64,
    pub duration_ms: u64,
}

/// Copies records out of one main collection.
pub struct Migrator {
    main: Arc<dyn VectorStore>,
    status: MigrationStatusStore,
    batch_size: usize,
}

#[derive(Default)]
struct Tally {
    migrated: u64,
    skipped: u64,
    deleted: u64,
}

impl Migrator {
    pub fn new(main: Arc<dyn VectorStore>, status: MigrationStatusStore) -> Self {
        Self {
            main,
            status,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Records per insert batch; zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run one migration into `sub`.
    ///
    /// On failure the migration record is left `failed` with the error
    /// message and records already copied stay in the sub-store.
    #[instrument(skip(self, sub), fields(sub_store = %sub.name, batch_size = self.batch_size))]
    pub async fn migrate(&self, sub: &SubStore, delete_source: bool) -> StoreResult<MigrationReport> {
        if self.status.is_degraded() {
            return Err(StoreError::Migration {
                sub_store: sub.name.clone(),
                message: "backend has no migration bookkeeping; the sub-store could never become ready"
                    .to_string(),
            });
        }
        let started = Instant::now();
        self.status.register(&sub.name, &sub.routing_filter).await;

        let mut tally = Tally::default();
        let outcome = self.run(sub, delete_source, &mut tally).await;

        match outcome {
            Ok(total_count) => {
                self.status.mark_completed(&sub.name, tally.migrated).await;
                let report = MigrationReport {
                    sub_store: sub.name.clone(),
                    total_count,
                    migrated_count: tally.migrated,
                    skipped_existing: tally.skipped,
                    deleted_from_source: tally.deleted,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                info!(
                    total = report.total_count,
                    migrated = report.migrated_count,
                    skipped = report.skipped_existing,
                    deleted = report.deleted_from_source,
                    duration_ms = report.duration_ms,
                    "migration completed"
                );
                Ok(report)
            }
            Err(e) => {
                let message = e.to_string();
                error!(migrated = tally.migrated, error = %message, "migration failed");
                self.status.mark_failed(&sub.name, &message).await;
                Err(StoreError::Migration {
                    sub_store: sub.name.clone(),
                    message,
                })
            }
        }
    }

    async fn run(&self, sub: &SubStore, delete_source: bool, tally: &mut Tally) -> StoreResult<u64> {
        let candidates = self.main.list(Some(&sub.routing_filter), None).await?;
        let total_count = candidates.len() as u64;
        info!(total = total_count, delete_source, "migration started");
        self.status.mark_migrating(&sub.name, total_count).await;

        // Unclaimed copies per digest. Each skipped candidate claims one.
        let mut present: HashMap<ContentDigest, usize> = HashMap::new();
        for record in sub.store.list(None, None).await? {
            *present.entry(ContentDigest::of_record(&record)).or_default() += 1;
        }

        for batch in candidates.chunks(self.batch_size) {
            let mut fresh: Vec<&Record> = Vec::with_capacity(batch.len());
            for record in batch {
                let digest = ContentDigest::of_record(record);
                match present.get_mut(&digest) {
                    Some(unclaimed) if *unclaimed > 0 => {
                        *unclaimed -= 1;
                        debug!(id = %record.id, digest = digest.short(), "already in sub-store");
                        tally.skipped += 1;
                    }
                    _ => fresh.push(record),
                }
            }

            if !fresh.is_empty() {
                let vectors: Vec<Vec<f32>> = fresh.iter().map(|r| r.vector.clone()).collect();
                let payloads: Vec<_> = fresh.iter().map(|r| r.payload.clone()).collect();
                sub.store.insert(&vectors, &payloads).await?;
            }
            tally.migrated += batch.len() as u64;

            // Every record of this batch is now in the sub-store.
            if delete_source {
                for record in batch {
                    if self.main.delete(record.id).await? {
                        tally.deleted += 1;
                    }
                }
            }

            self.status.update_progress(&sub.name, tally.migrated).await;
        }

        Ok(total_count)
    }
}
