//! Deployment configuration
//!
//! One explicit object, loaded once from JSON and handed to
//! [`MnemoStore::open`](crate::store::MnemoStore::open). `MNEMO_DB_*`
//! environment variables override the main connection.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::handle::ConnectionConfig;
use crate::id::MAX_WORKER_ID;
use crate::migrator::DEFAULT_BATCH_SIZE;
use crate::schema::MIGRATIONS_TABLE;
use crate::storage_traits::{validate_collection_name, Filters, StoreResult};

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// A named collection and its vector dimensionality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub dimension: usize,
}

/// One routed sub-store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubStoreConfig {
    pub name: String,
    pub routing_filter: Filters,
    /// Defaults to `<main>__<name>`
    #[serde(default)]
    pub collection: Option<String>,
    /// Must equal the main collection's dimension when set
    #[serde(default)]
    pub dimension: Option<usize>,
    /// Defaults to the main connection
    #[serde(default)]
    pub connection: Option<ConnectionConfig>,
}

impl SubStoreConfig {
    pub fn new(name: impl Into<String>, routing_filter: Filters) -> Self {
        Self {
            name: name.into(),
            routing_filter,
            collection: None,
            dimension: None,
            connection: None,
        }
    }

    pub fn collection_name(&self, main: &str) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| format!("{}__{}", main, self.name))
    }
}

/// Full deployment: connection, main collection and routing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MnemoConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    pub main_collection: CollectionConfig,
    #[serde(default)]
    pub sub_stores: Vec<SubStoreConfig>,
    /// Identifier generator worker tag; random when absent
    #[serde(default)]
    pub worker_id: Option<u16>,
    #[serde(default = "default_batch_size")]
    pub migration_batch_size: usize,
    #[serde(default)]
    pub strict_routing: bool,
}

impl MnemoConfig {
    /// In-memory deployment with no sub-stores.
    pub fn in_memory(collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            connection: ConnectionConfig::in_memory(),
            main_collection: CollectionConfig {
                name: collection.into(),
                dimension,
            },
            sub_stores: Vec::new(),
            worker_id: None,
            migration_batch_size: DEFAULT_BATCH_SIZE,
            strict_routing: false,
        }
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_sub_store(mut self, sub_store: SubStoreConfig) -> Self {
        self.sub_stores.push(sub_store);
        self
    }

    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, apply environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config: Self = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env();
        config.validate()?;
        debug!(path = %path.display(), sub_stores = config.sub_stores.len(), "configuration loaded");
        Ok(config)
    }

    /// Replace the main connection when `MNEMO_DB_ENDPOINT` is set.
    pub fn apply_env(&mut self) {
        if let Ok(connection) = ConnectionConfig::from_env() {
            debug!(endpoint = %connection.endpoint, "connection overridden from environment");
            self.connection = connection;
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        let main = &self.main_collection;
        if main.name.trim().is_empty() {
            return Err(StoreError::Config("main collection name is empty".to_string()));
        }
        validate_collection_name(&main.name).map_err(|e| StoreError::Config(e.to_string()))?;
        if main.name == MIGRATIONS_TABLE {
            return Err(StoreError::Config(format!(
                "'{}' is reserved for migration bookkeeping",
                MIGRATIONS_TABLE
            )));
        }
        if main.dimension == 0 {
            return Err(StoreError::Config("main collection dimension must be > 0".to_string()));
        }
        if self.migration_batch_size == 0 {
            return Err(StoreError::Config("migration_batch_size must be > 0".to_string()));
        }
        if let Some(worker) = self.worker_id {
            if worker > MAX_WORKER_ID {
                return Err(StoreError::Config(format!(
                    "worker_id {} exceeds {}",
                    worker, MAX_WORKER_ID
                )));
            }
        }
        self.connection.validate()?;

        let mut names = HashSet::new();
        let mut collections = HashSet::from([main.name.clone()]);
        for sub in &self.sub_stores {
            if sub.name.trim().is_empty() {
                return Err(StoreError::Config("sub-store name is empty".to_string()));
            }
            if !names.insert(sub.name.as_str()) {
                return Err(StoreError::Config(format!("duplicate sub-store '{}'", sub.name)));
            }
            if sub.routing_filter.is_empty() {
                return Err(StoreError::Config(format!(
                    "sub-store '{}' has an empty routing filter",
                    sub.name
                )));
            }
            if let Some((key, _)) = sub
                .routing_filter
                .iter()
                .find(|(_, v)| matches!(v, Value::Array(_) | Value::Object(_)))
            {
                return Err(StoreError::Config(format!(
                    "sub-store '{}': routing filter value for '{}' must be a scalar",
                    sub.name, key
                )));
            }
            let collection = sub.collection_name(&main.name);
            validate_collection_name(&collection).map_err(|e| {
                StoreError::Config(format!("sub-store '{}': {}", sub.name, e))
            })?;
            if collection == MIGRATIONS_TABLE {
                return Err(StoreError::Config(format!(
                    "sub-store '{}': '{}' is reserved for migration bookkeeping",
                    sub.name, MIGRATIONS_TABLE
                )));
            }
            if !collections.insert(collection.clone()) {
                return Err(StoreError::Config(format!(
                    "sub-store '{}' reuses collection '{}'",
                    sub.name, collection
                )));
            }
            // Sub-stores hold records moved out of main, so the vectors must fit.
            if let Some(dimension) = sub.dimension.filter(|d| *d != main.dimension) {
                return Err(StoreError::Config(format!(
                    "sub-store '{}' dimension {} differs from main collection dimension {}",
                    sub.name, dimension, main.dimension
                )));
            }
            if let Some(connection) = &sub.connection {
                connection.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
        "main_collection": { "name": "memories", "dimension": 3 },
        "sub_stores": [
            { "name": "working", "routing_filter": { "memory_type": "working" } }
        ]
    }"#;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = MnemoConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.connection, ConnectionConfig::in_memory());
        assert_eq!(config.migration_batch_size, DEFAULT_BATCH_SIZE);
        assert!(!config.strict_routing);
        assert_eq!(config.sub_stores[0].collection_name("memories"), "memories__working");
    }

    #[test]
    fn rejects_duplicate_sub_store_names() {
        let filter = json!({"memory_type": "working"}).as_object().cloned().unwrap();
        let config = MnemoConfig::in_memory("memories", 3)
            .with_sub_store(SubStoreConfig::new("working", filter.clone()))
            .with_sub_store(SubStoreConfig::new("working", filter));
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn rejects_empty_and_non_scalar_filters() {
        let empty = MnemoConfig::in_memory("memories", 3)
            .with_sub_store(SubStoreConfig::new("working", Filters::new()));
        assert!(empty.validate().is_err());

        let nested = json!({"tags": ["a"]}).as_object().cloned().unwrap();
        let nested = MnemoConfig::in_memory("memories", 3)
            .with_sub_store(SubStoreConfig::new("tagged", nested));
        assert!(nested.validate().is_err());
    }

    #[test]
    fn rejects_zero_dimension_and_bad_worker() {
        assert!(MnemoConfig::in_memory("memories", 0).validate().is_err());

        let mut config = MnemoConfig::in_memory("memories", 3);
        config.worker_id = Some(MAX_WORKER_ID + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unsafe_collection_names() {
        assert!(MnemoConfig::in_memory("memories; REMOVE TABLE x", 3).validate().is_err());
    }

    #[test]
    fn rejects_sub_store_dimension_other_than_main() {
        let filter = json!({"memory_type": "working"}).as_object().cloned().unwrap();
        let mut sub = SubStoreConfig::new("working", filter);
        sub.dimension = Some(4);
        let config = MnemoConfig::in_memory("memories", 3).with_sub_store(sub.clone());
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));

        sub.dimension = Some(3);
        let config = MnemoConfig::in_memory("memories", 3).with_sub_store(sub);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bookkeeping_table_as_collection() {
        assert!(MnemoConfig::in_memory(MIGRATIONS_TABLE, 3).validate().is_err());

        let filter = json!({"memory_type": "working"}).as_object().cloned().unwrap();
        let mut sub = SubStoreConfig::new("working", filter);
        sub.collection = Some(MIGRATIONS_TABLE.to_string());
        let config = MnemoConfig::in_memory("memories", 3).with_sub_store(sub);
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = MnemoConfig::load(&path).unwrap();
        assert_eq!(config.main_collection.name, "memories");
        assert_eq!(config.sub_stores.len(), 1);
    }

    #[test]
    fn load_reports_missing_file_as_config_error() {
        let err = MnemoConfig::load("/nonexistent/mnemo.json").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
