//! Trait contract tests for VectorStore and StatusTable.
//!
//! Each contract is written once against the trait object and run against
//! the in-memory fakes and the SurrealDB in-memory backend. Any conforming
//! implementation must pass these.

use std::sync::Arc;

use mnemo_state::fakes::{FailingVectorStore, MemoryStatusTable, MemoryVectorStore};
use mnemo_state::storage_traits::*;
use mnemo_state::{RecordId, SurrealStatusTable, SurrealVectorStore};
use serde_json::{json, Value};

fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap()
}

async fn surreal(dimension: usize) -> Arc<dyn VectorStore> {
    Arc::new(SurrealVectorStore::in_memory("memories", dimension).await.unwrap())
}

fn memory(dimension: usize) -> Arc<dyn VectorStore> {
    Arc::new(MemoryVectorStore::new("memories", dimension))
}

// ===========================================================================
// VectorStore contracts
// ===========================================================================

async fn round_trip(store: Arc<dyn VectorStore>) {
    let p = payload(json!({"user_id": "u1", "data": "likes tea", "nested": {"a": [1, 2]}}));
    let ids = store.insert(&[vec![0.25, -1.5, 3.0]], &[p.clone()]).await.unwrap();
    assert_eq!(ids.len(), 1);

    let record = store.get(ids[0]).await.unwrap().unwrap();
    assert_eq!(record.id, ids[0]);
    assert_eq!(record.payload, p);
    for (got, want) in record.vector.iter().zip([0.25f32, -1.5, 3.0]) {
        assert!((got - want).abs() < 1e-6);
    }
}

async fn ids_follow_input_order(store: Arc<dyn VectorStore>) {
    let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]];
    let payloads: Vec<Payload> = (0..3).map(|n| payload(json!({ "n": n }))).collect();
    let ids = store.insert(&vectors, &payloads).await.unwrap();

    for (n, id) in ids.iter().enumerate() {
        let record = store.get(*id).await.unwrap().unwrap();
        assert_eq!(record.payload["n"], json!(n));
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

async fn similarity_ordering(store: Arc<dyn VectorStore>) {
    let query = vec![1.0, 0.0, 0.0];
    // inserted worst first so ranking, not insertion order, decides
    store
        .insert(
            &[vec![-1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0]],
            &[
                payload(json!({"name": "c"})),
                payload(json!({"name": "b"})),
                payload(json!({"name": "a"})),
            ],
        )
        .await
        .unwrap();

    let hits = store.search(&query, 3, None).await.unwrap();
    let names: Vec<_> = hits.iter().map(|h| h.record.payload["name"].clone()).collect();
    assert_eq!(names, vec![json!("a"), json!("b"), json!("c")]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert!(hits[1].score.abs() < 1e-6);
    assert!((hits[2].score + 1.0).abs() < 1e-6);
}

async fn search_respects_limit_and_ties(store: Arc<dyn VectorStore>) {
    let ids = store
        .insert(
            &[vec![1.0, 0.0, 0.0], vec![2.0, 0.0, 0.0], vec![3.0, 0.0, 0.0]],
            &[payload(json!({})), payload(json!({})), payload(json!({}))],
        )
        .await
        .unwrap();

    let hits = store.search(&[1.0, 0.0, 0.0], 2, None).await.unwrap();
    let got: Vec<RecordId> = hits.iter().map(|h| h.record.id).collect();
    assert_eq!(got, ids[..2].to_vec());
}

async fn zero_vector_scores_zero(store: Arc<dyn VectorStore>) {
    store
        .insert(&[vec![0.0, 0.0, 0.0]], &[payload(json!({}))])
        .await
        .unwrap();
    let hits = store.search(&[1.0, 0.0, 0.0], 5, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].score, 0.0);
}

async fn filter_correctness(store: Arc<dyn VectorStore>) {
    store
        .insert(
            &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.9, 0.1, 0.0]],
            &[
                payload(json!({"type": "x"})),
                payload(json!({"type": "y"})),
                payload(json!({"type": "x", "extra": true})),
            ],
        )
        .await
        .unwrap();

    let filters = payload(json!({"type": "x"}));
    let hits = store.search(&[1.0, 0.0, 0.0], 10, Some(&filters)).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.record.payload["type"] == json!("x")));

    let listed = store.list(Some(&filters), None).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(store.list(None, Some(1)).await.unwrap().len(), 1);
    assert_eq!(store.list(None, None).await.unwrap().len(), 3);
}

async fn unknown_ids_are_not_errors(store: Arc<dyn VectorStore>) {
    let missing = RecordId(12345);
    assert!(store.get(missing).await.unwrap().is_none());
    assert!(!store
        .update(missing, Some(vec![1.0, 0.0, 0.0]), None)
        .await
        .unwrap());
    assert!(!store.delete(missing).await.unwrap());
}

async fn update_and_delete(store: Arc<dyn VectorStore>) {
    let ids = store
        .insert(&[vec![1.0, 0.0, 0.0]], &[payload(json!({"v": 1}))])
        .await
        .unwrap();

    assert!(store
        .update(ids[0], Some(vec![0.0, 1.0, 0.0]), None)
        .await
        .unwrap());
    let record = store.get(ids[0]).await.unwrap().unwrap();
    assert_eq!(record.vector, vec![0.0, 1.0, 0.0]);
    assert_eq!(record.payload, payload(json!({"v": 1})));

    assert!(store.delete(ids[0]).await.unwrap());
    assert!(store.get(ids[0]).await.unwrap().is_none());
    assert!(!store.delete(ids[0]).await.unwrap());
}

async fn validation_before_io(store: Arc<dyn VectorStore>) {
    let err = store
        .insert(
            &[vec![1.0, 0.0, 0.0], vec![1.0]],
            &[payload(json!({})), payload(json!({}))],
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = store
        .insert(&[vec![1.0, 0.0, 0.0]], &[])
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = store.search(&[1.0], 1, None).await.unwrap_err();
    assert!(err.is_validation());

    assert_eq!(store.collection_info().await.unwrap().record_count, 0);
}

async fn empty_insert_is_noop(store: Arc<dyn VectorStore>) {
    assert!(store.insert(&[], &[]).await.unwrap().is_empty());
    assert_eq!(store.collection_info().await.unwrap().record_count, 0);
}

async fn reset_discards_records(store: Arc<dyn VectorStore>) {
    store
        .insert(
            &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            &[payload(json!({})), payload(json!({}))],
        )
        .await
        .unwrap();
    let info = store.collection_info().await.unwrap();
    assert_eq!(info.name, "memories");
    assert_eq!(info.record_count, 2);

    store.reset().await.unwrap();
    assert_eq!(store.collection_info().await.unwrap().record_count, 0);
    store.create_collection().await.unwrap();
    store
        .insert(&[vec![1.0, 0.0, 0.0]], &[payload(json!({}))])
        .await
        .unwrap();
    assert_eq!(store.collection_info().await.unwrap().record_count, 1);
}

async fn backend_failures_surface_as_storage_errors(store: Arc<dyn VectorStore>) {
    let ids = store
        .insert(&[vec![1.0, 0.0, 0.0]], &[payload(json!({"n": 1}))])
        .await
        .unwrap();
    let failing = FailingVectorStore::new(store.clone(), 0);

    let err = failing
        .insert(&[vec![0.0, 1.0, 0.0]], &[payload(json!({"n": 2}))])
        .await
        .unwrap_err();
    assert!(err.is_storage());
    assert!(!err.is_validation());

    failing.fail_reads(true);
    assert!(failing.get(ids[0]).await.unwrap_err().is_storage());
    assert!(failing.list(None, None).await.unwrap_err().is_storage());
    assert!(failing
        .search(&[1.0, 0.0, 0.0], 5, None)
        .await
        .unwrap_err()
        .is_storage());

    // nothing was written by the failed insert
    assert_eq!(store.list(None, None).await.unwrap().len(), 1);
}

macro_rules! vector_store_contracts {
    ($($name:ident),* $(,)?) => {
        mod memory_vector_store {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(memory(3)).await;
                }
            )*
        }

        mod surreal_vector_store {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(surreal(3).await).await;
                }
            )*
        }
    };
}

vector_store_contracts!(
    round_trip,
    ids_follow_input_order,
    similarity_ordering,
    search_respects_limit_and_ties,
    zero_vector_scores_zero,
    filter_correctness,
    unknown_ids_are_not_errors,
    update_and_delete,
    validation_before_io,
    empty_insert_is_noop,
    reset_discards_records,
    backend_failures_surface_as_storage_errors,
);

// ===========================================================================
// StatusTable contracts
// ===========================================================================

fn working() -> Filters {
    payload(json!({"memory_type": "working"}))
}

async fn register_is_idempotent(table: Arc<dyn StatusTable>) {
    table.register("memories", "working", &working()).await.unwrap();
    table.mark_migrating("memories", "working", 5).await.unwrap();

    let refreshed = payload(json!({"memory_type": "working", "tier": 1}));
    table.register("memories", "working", &refreshed).await.unwrap();

    let all = table.fetch_all("memories").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, MigrationStatus::Migrating);
    assert_eq!(all[0].total_count, 5);
    assert_eq!(all[0].routing_filter, refreshed);
}

async fn state_machine(table: Arc<dyn StatusTable>) {
    table.register("memories", "working", &working()).await.unwrap();
    let fresh = table.fetch("memories", "working").await.unwrap().unwrap();
    assert_eq!(fresh.status, MigrationStatus::Pending);
    assert!(fresh.started_at.is_none());

    table.mark_migrating("memories", "working", 4).await.unwrap();
    table.update_progress("memories", "working", 2).await.unwrap();
    table.update_progress("memories", "working", 1).await.unwrap();
    let running = table.fetch("memories", "working").await.unwrap().unwrap();
    assert_eq!(running.status, MigrationStatus::Migrating);
    assert_eq!(running.migrated_count, 2);
    assert!(running.started_at.is_some());

    table.mark_completed("memories", "working", 4).await.unwrap();
    let done = table.fetch("memories", "working").await.unwrap().unwrap();
    assert_eq!(done.status, MigrationStatus::Completed);
    assert_eq!(done.migrated_count, 4);
    assert!(done.completed_at.is_some());

    table.reset("memories", "working").await.unwrap();
    let reset = table.fetch("memories", "working").await.unwrap().unwrap();
    assert_eq!(reset.status, MigrationStatus::Pending);
    assert_eq!(reset.migrated_count, 0);
    assert_eq!(reset.total_count, 0);
    assert!(reset.started_at.is_none());
    assert!(reset.completed_at.is_none());
}

async fn failure_keeps_counters(table: Arc<dyn StatusTable>) {
    table.register("memories", "working", &working()).await.unwrap();
    table.mark_migrating("memories", "working", 10).await.unwrap();
    table.update_progress("memories", "working", 3).await.unwrap();
    table.mark_failed("memories", "working", "disk full").await.unwrap();

    let failed = table.fetch("memories", "working").await.unwrap().unwrap();
    assert_eq!(failed.status, MigrationStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("disk full"));
    assert_eq!(failed.migrated_count, 3);
    assert_eq!(failed.total_count, 10);

    // retry from failed clears the error
    table.mark_migrating("memories", "working", 7).await.unwrap();
    let retry = table.fetch("memories", "working").await.unwrap().unwrap();
    assert_eq!(retry.status, MigrationStatus::Migrating);
    assert!(retry.error_message.is_none());
    assert_eq!(retry.migrated_count, 0);
}

async fn rows_are_scoped_by_collection(table: Arc<dyn StatusTable>) {
    table.register("memories", "working", &working()).await.unwrap();
    table.register("memories", "episodic", &working()).await.unwrap();
    table.register("archive", "working", &working()).await.unwrap();

    let names: Vec<_> = table
        .fetch_all("memories")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.sub_store_name)
        .collect();
    assert_eq!(names, vec!["episodic", "working"]);
    assert!(table.fetch("memories", "missing").await.unwrap().is_none());
}

async fn writes_to_unregistered_rows_are_ignored(table: Arc<dyn StatusTable>) {
    table.mark_completed("memories", "ghost", 3).await.unwrap();
    assert!(table.fetch("memories", "ghost").await.unwrap().is_none());
}

macro_rules! status_table_contracts {
    ($($name:ident),* $(,)?) => {
        mod memory_status_table {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(Arc::new(MemoryStatusTable::new())).await;
                }
            )*
        }

        mod surreal_status_table {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(Arc::new(SurrealStatusTable::in_memory().await.unwrap())).await;
                }
            )*
        }
    };
}

status_table_contracts!(
    register_is_idempotent,
    state_machine,
    failure_keeps_counters,
    rows_are_scoped_by_collection,
    writes_to_unregistered_rows_are_ignored,
);
