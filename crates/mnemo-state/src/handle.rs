//! SurrealDB Handle - Connection setup
//!
//! Supports in-memory (`mem://`), embedded durable (`surrealkv://path`) and
//! remote (`ws://`, `wss://`) endpoints. One handle may be shared by many
//! collection stores and the migration status table.

use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StoreError;
use crate::storage_traits::StoreResult;

fn default_endpoint() -> String {
    "mem://".to_string()
}

fn default_namespace() -> String {
    "mnemo".to_string()
}

fn default_database() -> String {
    "main".to_string()
}

/// Configuration for a SurrealDB connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Endpoint URL (e.g. "mem://", "surrealkv://.mnemo/db", "wss://host")
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Namespace (default: "mnemo")
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Database name (default: "main")
    #[serde(default = "default_database")]
    pub database: String,
    /// Username for remote endpoints
    #[serde(default)]
    pub username: Option<String>,
    /// Password for remote endpoints
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Whether this is a root user (true) or database user (false)
    #[serde(default)]
    pub is_root: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ConnectionConfig {
    /// In-memory database; contents are lost when the process exits.
    pub fn in_memory() -> Self {
        Self {
            endpoint: default_endpoint(),
            namespace: default_namespace(),
            database: default_database(),
            username: None,
            password: None,
            is_root: false,
        }
    }

    /// Embedded durable database stored under `path`.
    pub fn local(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            endpoint: format!("surrealkv://{}", path.as_ref().display()),
            ..Self::in_memory()
        }
    }

    /// Remote endpoint with database-user credentials
    pub fn remote(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::in_memory()
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - MNEMO_DB_ENDPOINT (required)
    /// - MNEMO_DB_USERNAME (optional)
    /// - MNEMO_DB_PASSWORD (optional)
    /// - MNEMO_DB_NAMESPACE (optional, default: "mnemo")
    /// - MNEMO_DB_DATABASE (optional, default: "main")
    /// - MNEMO_DB_ROOT (optional, default: "false") - set to "true" for root users
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("MNEMO_DB_ENDPOINT").map_err(|_| "MNEMO_DB_ENDPOINT not set")?;
        let username = std::env::var("MNEMO_DB_USERNAME").ok();
        let password = std::env::var("MNEMO_DB_PASSWORD").ok();
        let namespace = std::env::var("MNEMO_DB_NAMESPACE").unwrap_or_else(|_| default_namespace());
        let database = std::env::var("MNEMO_DB_DATABASE").unwrap_or_else(|_| default_database());
        let is_root = std::env::var("MNEMO_DB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            namespace,
            database,
            username,
            password,
            is_root,
        })
    }

    /// True for `ws://` / `wss://` / `http(s)://` endpoints.
    pub fn is_remote(&self) -> bool {
        ["ws://", "wss://", "http://", "https://"]
            .iter()
            .any(|scheme| self.endpoint.starts_with(scheme))
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(StoreError::Config("connection endpoint is empty".to_string()));
        }
        if self.is_remote() && (self.username.is_none() || self.password.is_none()) {
            return Err(StoreError::Config(format!(
                "remote endpoint {} requires username and password",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// SurrealDB connection handle, cheap to clone
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
    location: String,
}

impl SurrealHandle {
    /// Connect to an in-memory database
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect(&ConnectionConfig::in_memory()).await
    }

    /// Connect, authenticate (remote endpoints only) and select namespace/database.
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn connect(config: &ConnectionConfig) -> StoreResult<Self> {
        config.validate()?;
        info!("Connecting to SurrealDB");

        if let Some(path) = config.endpoint.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StoreError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(config.endpoint.as_str())
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            if config.is_root {
                db.signin(Root {
                    username: username.as_str(),
                    password: password.as_str(),
                })
                .await
                .map_err(|e| {
                    StoreError::Connection(format!("Root authentication failed: {}", e))
                })?;
            } else {
                db.signin(Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username: username.as_str(),
                    password: password.as_str(),
                })
                .await
                .map_err(|e| {
                    StoreError::Connection(format!("Database authentication failed: {}", e))
                })?;
            }
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        let base = if config.endpoint.ends_with("://") {
            config.endpoint.clone()
        } else {
            format!("{}/", config.endpoint.trim_end_matches('/'))
        };
        let location = format!("{}{}/{}", base, config.namespace, config.database);
        info!(%location, "SurrealDB connected");
        Ok(Self { db, location })
    }

    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }

    /// `endpoint/namespace/database`
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl std::fmt::Debug for SurrealHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealHandle")
            .field("location", &self.location)
            .finish()
    }
}
