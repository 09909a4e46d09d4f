//! Mnemo-State: vector memory storage for AI agents
//!
//! Persists memory records (embedding vector plus JSON payload), answers
//! filtered similarity searches, and splits one logical collection into a
//! main store plus routed sub-stores that records can be migrated into
//! without interrupting traffic.
//!
//! ## Key Components
//!
//! - `VectorStore`: one collection (SurrealDB reference backend and
//!   in-memory fakes)
//! - `IdGenerator`: coordination-free, time-ordered 64-bit record ids
//! - `MigrationStatusStore`: durable per-sub-store migration state machine
//! - `Router`: picks main or a ready sub-store for each operation
//! - `Migrator`: batch transfer from main into a sub-store
//! - `MnemoStore`: the routed facade tying them together

pub mod config;
mod error;
pub mod fakes;
mod handle;
pub mod id;
pub mod migrations;
pub mod migrator;
pub mod router;
mod schema;
pub mod status;
pub mod storage_traits;
pub mod store;
pub mod surreal_status;
pub mod surreal_store;
pub mod telemetry;

pub use config::{CollectionConfig, MnemoConfig, SubStoreConfig};
pub use error::StoreError;
pub use handle::{ConnectionConfig, SurrealHandle};
pub use id::{IdGenerator, IdParts, RecordId};
pub use migrator::{MigrationReport, Migrator};
pub use router::{Routed, Router, Scope, StoreOrigin, SubStore, SubStoreRef, Target};
pub use schema::MIGRATIONS_TABLE;
pub use status::{MigrationProgress, MigrationStatusStore};
pub use storage_traits::{
    CollectionInfo, ContentDigest, Filters, MigrationRecord, MigrationStatus, Payload, Record,
    ScoredRecord, StatusTable, StoreResult, VectorStore,
};
pub use store::MnemoStore;
pub use surreal_status::SurrealStatusTable;
pub use surreal_store::SurrealVectorStore;

/// Result type for mnemo-state operations
pub type Result<T> = std::result::Result<T, StoreError>;
