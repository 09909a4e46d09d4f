//! Routed memory store
//!
//! `MnemoStore` is the entry point callers use: a main collection, its
//! sub-stores and their migration bookkeeping behind one data-plane and
//! admin-plane API. Every data-plane call goes through the [`Router`].

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument};

use crate::config::MnemoConfig;
use crate::error::StoreError;
use crate::handle::{ConnectionConfig, SurrealHandle};
use crate::id::{IdGenerator, RecordId};
use crate::migrator::{MigrationReport, Migrator, DEFAULT_BATCH_SIZE};
use crate::router::{Routed, Router, Scope, StoreOrigin, SubStore, SubStoreRef, Target};
use crate::status::{MigrationProgress, MigrationStatusStore};
use crate::storage_traits::{
    validate_vector, CollectionInfo, Filters, Payload, Record, ScoredRecord, StoreResult,
    VectorStore,
};
use crate::surreal_store::SurrealVectorStore;

/// Main collection plus routed sub-stores.
pub struct MnemoStore {
    router: Router,
    batch_size: usize,
}

impl MnemoStore {
    /// Connect every configured backend, create the collections and register
    /// the sub-stores.
    ///
    /// Sub-stores sharing a connection config share one database handle.
    #[instrument(skip(config), fields(collection = %config.main_collection.name))]
    pub async fn open(config: &MnemoConfig) -> StoreResult<Self> {
        config.validate()?;

        let ids = Arc::new(match config.worker_id {
            Some(worker) => IdGenerator::new(worker),
            None => IdGenerator::with_random_worker(),
        });
        info!(worker = ids.worker(), "opening memory store");

        let mut handles = HandlePool::default();
        let main_handle = handles.get(&config.connection).await?;
        let main = SurrealVectorStore::new(
            main_handle,
            config.main_collection.name.clone(),
            config.main_collection.dimension,
            ids.clone(),
        )?;
        let status = MigrationStatusStore::for_backend(&main);
        let main: Arc<dyn VectorStore> = Arc::new(main);

        let mut sub_stores = Vec::with_capacity(config.sub_stores.len());
        for sub in &config.sub_stores {
            let connection = sub.connection.as_ref().unwrap_or(&config.connection);
            let store = SurrealVectorStore::new(
                handles.get(connection).await?,
                sub.collection_name(&config.main_collection.name),
                sub.dimension.unwrap_or(config.main_collection.dimension),
                ids.clone(),
            )?;
            sub_stores.push(SubStore::new(
                sub.name.clone(),
                sub.routing_filter.clone(),
                Arc::new(store),
            ));
        }

        let router = Router::new(main, sub_stores, status).strict(config.strict_routing);
        Self::with_router(router, config.migration_batch_size).await
    }

    /// Wrap an assembled router: create every collection and register every
    /// sub-store. Registration is idempotent.
    pub async fn with_router(router: Router, batch_size: usize) -> StoreResult<Self> {
        router.main().create_collection().await?;
        for sub in router.sub_stores() {
            sub.store.create_collection().await?;
            router.status().register(&sub.name, &sub.routing_filter).await;
        }
        Ok(Self {
            router,
            batch_size: batch_size.max(1),
        })
    }

    /// Store over existing backends, with the status store taken from `main`.
    pub async fn from_stores(
        main: Arc<dyn VectorStore>,
        sub_stores: Vec<SubStore>,
    ) -> StoreResult<Self> {
        let status = MigrationStatusStore::for_backend(main.as_ref());
        Self::with_router(Router::new(main, sub_stores, status), DEFAULT_BATCH_SIZE).await
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn main(&self) -> &Arc<dyn VectorStore> {
        self.router.main()
    }

    pub fn status_store(&self) -> &MigrationStatusStore {
        self.router.status()
    }

    // -- data plane ----------------------------------------------------------

    /// Insert records, each routed by its own payload. Ids come back in input
    /// order. The whole batch is validated before any store is written; the
    /// per-store writes are not atomic with each other.
    #[instrument(skip(self, vectors, payloads), fields(count = vectors.len()))]
    pub async fn insert(
        &self,
        vectors: &[Vec<f32>],
        payloads: &[Payload],
    ) -> StoreResult<Vec<RecordId>> {
        if vectors.len() != payloads.len() {
            return Err(StoreError::Validation(format!(
                "{} vectors but {} payloads",
                vectors.len(),
                payloads.len()
            )));
        }
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut groups: Vec<(Target, Vec<usize>)> = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            let target = self.router.route_insert(payload).await?;
            validate_vector(&vectors[i], target.store.dimension())?;
            match groups.iter_mut().find(|(t, _)| t.origin == target.origin) {
                Some((_, indices)) => indices.push(i),
                None => groups.push((target, vec![i])),
            }
        }

        let mut ids = vec![RecordId(0); vectors.len()];
        for (target, indices) in groups {
            let group_vectors: Vec<Vec<f32>> = indices.iter().map(|&i| vectors[i].clone()).collect();
            let group_payloads: Vec<Payload> = indices.iter().map(|&i| payloads[i].clone()).collect();
            let assigned = target.store.insert(&group_vectors, &group_payloads).await?;
            debug!(origin = %target.origin, count = assigned.len(), "inserted");
            for (i, id) in indices.into_iter().zip(assigned) {
                ids[i] = id;
            }
        }
        Ok(ids)
    }

    /// Similarity search. Fan-out results are merged by descending score.
    #[instrument(skip(self, query, filters))]
    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
        scope: &Scope,
        filters: Option<&Filters>,
    ) -> StoreResult<Vec<Routed<ScoredRecord>>> {
        if query.is_empty() {
            return Err(StoreError::Validation("query vector is empty".to_string()));
        }
        let effective = scope.apply(filters);
        let targets = self.router.route_read(filters, &effective).await?;

        let per_store = try_join_all(targets.iter().map(|target| async {
            let hits = target.store.search(query, limit, Some(&effective)).await?;
            Ok::<_, StoreError>(tag(&target.origin, hits))
        }))
        .await?;

        let mut merged: Vec<Routed<ScoredRecord>> = per_store.into_iter().flatten().collect();
        merged.sort_by(|a, b| {
            b.item
                .score
                .partial_cmp(&a.item.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(limit);
        Ok(merged)
    }

    /// Filtered listing. Fan-out results are concatenated main first.
    #[instrument(skip(self, filters))]
    pub async fn list(
        &self,
        scope: &Scope,
        filters: Option<&Filters>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Routed<Record>>> {
        let effective = scope.apply(filters);
        let targets = self.router.route_read(filters, &effective).await?;

        let per_store = try_join_all(targets.iter().map(|target| async {
            let records = target.store.list(Some(&effective), limit).await?;
            Ok::<_, StoreError>(tag(&target.origin, records))
        }))
        .await?;

        let mut merged: Vec<Routed<Record>> = per_store.into_iter().flatten().collect();
        if let Some(limit) = limit {
            merged.truncate(limit);
        }
        Ok(merged)
    }

    /// Point lookup: main first, then every ready sub-store.
    pub async fn get(&self, id: RecordId) -> StoreResult<Option<Routed<Record>>> {
        for target in self.router.ready_targets().await {
            if let Some(record) = target.store.get(id).await? {
                return Ok(Some(Routed::new(target.origin, record)));
            }
        }
        Ok(None)
    }

    /// Partial update of whichever store holds `id`; `false` if none does.
    pub async fn update(
        &self,
        id: RecordId,
        vector: Option<Vec<f32>>,
        payload: Option<Payload>,
    ) -> StoreResult<bool> {
        for target in self.router.ready_targets().await {
            if target.store.update(id, vector.clone(), payload.clone()).await? {
                debug!(%id, origin = %target.origin, "updated");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Delete from whichever store holds `id`; `false` if none does.
    pub async fn delete(&self, id: RecordId) -> StoreResult<bool> {
        for target in self.router.ready_targets().await {
            if target.store.delete(id).await? {
                debug!(%id, origin = %target.origin, "deleted");
                return Ok(true);
            }
        }
        Ok(false)
    }

    // -- admin plane ---------------------------------------------------------

    pub async fn migrate(
        &self,
        sub_store: &SubStoreRef,
        delete_source: bool,
    ) -> StoreResult<MigrationReport> {
        self.migrate_with_batch_size(sub_store, delete_source, self.batch_size)
            .await
    }

    pub async fn migrate_with_batch_size(
        &self,
        sub_store: &SubStoreRef,
        delete_source: bool,
        batch_size: usize,
    ) -> StoreResult<MigrationReport> {
        let sub = self.router.resolve(sub_store)?;
        Migrator::new(self.router.main().clone(), self.router.status().clone())
            .with_batch_size(batch_size)
            .migrate(sub, delete_source)
            .await
    }

    pub async fn status(&self, sub_store: &SubStoreRef) -> StoreResult<Option<MigrationProgress>> {
        let sub = self.router.resolve(sub_store)?;
        Ok(self.router.status().get_progress(&sub.name).await)
    }

    /// Progress of every configured sub-store that has a migration record,
    /// in configuration order.
    pub async fn statuses(&self) -> Vec<MigrationProgress> {
        let mut progress = Vec::with_capacity(self.router.sub_stores().len());
        for sub in self.router.sub_stores() {
            if let Some(p) = self.router.status().get_progress(&sub.name).await {
                progress.push(p);
            }
        }
        progress
    }

    /// Return a sub-store's migration record to `pending`. Records already in
    /// the sub-store are kept; a re-run skips them.
    pub async fn reset(&self, sub_store: &SubStoreRef) -> StoreResult<()> {
        let sub = self.router.resolve(sub_store)?;
        self.router.status().reset(&sub.name).await;
        Ok(())
    }

    /// Main collection first, then every sub-store in configuration order.
    pub async fn collection_infos(&self) -> StoreResult<Vec<Routed<CollectionInfo>>> {
        let mut infos = vec![Routed::new(
            StoreOrigin::Main,
            self.router.main().collection_info().await?,
        )];
        for sub in self.router.sub_stores() {
            infos.push(Routed::new(
                StoreOrigin::SubStore(sub.name.clone()),
                sub.store.collection_info().await?,
            ));
        }
        Ok(infos)
    }
}

fn tag<T>(origin: &StoreOrigin, items: Vec<T>) -> Vec<Routed<T>> {
    items
        .into_iter()
        .map(|item| Routed::new(origin.clone(), item))
        .collect()
}

/// One handle per distinct connection config. Separate `mem://` connections
/// are separate databases, and a `surrealkv://` path can only be opened once
/// per process.
#[derive(Default)]
struct HandlePool {
    handles: Vec<(ConnectionConfig, SurrealHandle)>,
}

impl HandlePool {
    async fn get(&mut self, config: &ConnectionConfig) -> StoreResult<SurrealHandle> {
        if let Some((_, handle)) = self.handles.iter().find(|(c, _)| c == config) {
            return Ok(handle.clone());
        }
        let handle = SurrealHandle::connect(config).await?;
        self.handles.push((config.clone(), handle.clone()));
        Ok(handle)
    }
}
