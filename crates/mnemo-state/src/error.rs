//! Error types for mnemo-state

use thiserror::Error;

/// Errors that can occur in the memory storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed input (count or dimension mismatch, bad identifier).
    /// Raised before any I/O is attempted.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Backend I/O failure (query, write, corruption)
    #[error("Storage operation failed: {0}")]
    Storage(String),

    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Row or payload (de)serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// More than one ready sub-store matched an operation (strict routing only)
    #[error("Ambiguous routing: filter matches sub-stores {matches:?}")]
    RoutingAmbiguity { matches: Vec<String> },

    /// A migration run failed; the migration record holds the same message
    #[error("Migration into '{sub_store}' failed: {message}")]
    Migration { sub_store: String, message: String },

    /// Sub-store name or index is not configured
    #[error("Unknown sub-store: {0}")]
    UnknownSubStore(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// True for backend failures (the StorageError class): storage,
    /// connection and schema errors.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::Storage(_) | StoreError::Connection(_) | StoreError::SchemaSetup(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
