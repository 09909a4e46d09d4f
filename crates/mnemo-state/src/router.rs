//! Sub-store routing
//!
//! Picks the physical collection for an operation. A sub-store owns an
//! operation when its routing filter is a subset of the operation's filter
//! (or of the record payload, for inserts) and its migration is completed.
//! Anything else goes to the main collection. Reads without a metadata
//! filter fan out to main plus every ready sub-store.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::status::MigrationStatusStore;
use crate::storage_traits::{matches_filters, Filters, Payload, StoreResult, VectorStore};

/// Which physical store served a result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum StoreOrigin {
    Main,
    SubStore(String),
}

impl fmt::Display for StoreOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOrigin::Main => write!(f, "main"),
            StoreOrigin::SubStore(name) => write!(f, "{}", name),
        }
    }
}

/// A result tagged with the store it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routed<T> {
    pub origin: StoreOrigin,
    pub item: T,
}

impl<T> Routed<T> {
    pub fn new(origin: StoreOrigin, item: T) -> Self {
        Self { origin, item }
    }
}

/// Owner scope folded into every read as exact-match constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl Scope {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.agent_id.is_none() && self.run_id.is_none()
    }

    /// Scope keys as filter constraints.
    pub fn to_filters(&self) -> Filters {
        let mut filters = Filters::new();
        let keys = [
            ("user_id", &self.user_id),
            ("agent_id", &self.agent_id),
            ("run_id", &self.run_id),
        ];
        for (key, value) in keys {
            if let Some(value) = value {
                filters.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        filters
    }

    /// `filters` with the scope constraints added. A metadata key that
    /// collides with a scope key is overridden by the scope.
    pub fn apply(&self, filters: Option<&Filters>) -> Filters {
        let mut merged = filters.cloned().unwrap_or_default();
        merged.extend(self.to_filters());
        merged
    }
}

/// Admin address of a sub-store: position in the configuration or name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubStoreRef {
    Index(usize),
    Name(String),
}

impl FromStr for SubStoreRef {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(StoreError::Validation("empty sub-store reference".to_string()));
        }
        if s.chars().all(|c| c.is_ascii_digit()) {
            let index = s
                .parse()
                .map_err(|_| StoreError::Validation(format!("sub-store index out of range: {s}")))?;
            return Ok(SubStoreRef::Index(index));
        }
        Ok(SubStoreRef::Name(s.to_string()))
    }
}

impl fmt::Display for SubStoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubStoreRef::Index(i) => write!(f, "#{}", i),
            SubStoreRef::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<usize> for SubStoreRef {
    fn from(index: usize) -> Self {
        SubStoreRef::Index(index)
    }
}

impl From<&str> for SubStoreRef {
    fn from(name: &str) -> Self {
        SubStoreRef::Name(name.to_string())
    }
}

/// A registered sub-store: its collection plus the routing filter selecting
/// the records it owns.
#[derive(Clone)]
pub struct SubStore {
    pub name: String,
    pub routing_filter: Filters,
    pub store: Arc<dyn VectorStore>,
}

impl SubStore {
    pub fn new(name: impl Into<String>, routing_filter: Filters, store: Arc<dyn VectorStore>) -> Self {
        Self {
            name: name.into(),
            routing_filter,
            store,
        }
    }

    /// Every routing key is present in `fields` with the same value.
    pub fn owns(&self, fields: &Filters) -> bool {
        !self.routing_filter.is_empty() && matches_filters(fields, &self.routing_filter)
    }
}

impl fmt::Debug for SubStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubStore")
            .field("name", &self.name)
            .field("routing_filter", &self.routing_filter)
            .field("collection", &self.store.name())
            .finish()
    }
}

/// One routing decision.
#[derive(Clone)]
pub struct Target {
    pub origin: StoreOrigin,
    pub store: Arc<dyn VectorStore>,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("origin", &self.origin)
            .field("collection", &self.store.name())
            .finish()
    }
}

/// Routes operations between the main collection and its sub-stores.
pub struct Router {
    main: Arc<dyn VectorStore>,
    sub_stores: Vec<SubStore>,
    status: MigrationStatusStore,
    strict: bool,
}

impl Router {
    pub fn new(
        main: Arc<dyn VectorStore>,
        sub_stores: Vec<SubStore>,
        status: MigrationStatusStore,
    ) -> Self {
        Self {
            main,
            sub_stores,
            status,
            strict: false,
        }
    }

    /// Fail with `RoutingAmbiguity` instead of taking the first match when
    /// several ready sub-stores own an operation.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn main(&self) -> &Arc<dyn VectorStore> {
        &self.main
    }

    pub fn sub_stores(&self) -> &[SubStore] {
        &self.sub_stores
    }

    pub fn status(&self) -> &MigrationStatusStore {
        &self.status
    }

    pub fn main_target(&self) -> Target {
        Target {
            origin: StoreOrigin::Main,
            store: self.main.clone(),
        }
    }

    pub fn resolve(&self, sub_store: &SubStoreRef) -> StoreResult<&SubStore> {
        let found = match sub_store {
            SubStoreRef::Index(i) => self.sub_stores.get(*i),
            SubStoreRef::Name(name) => self.sub_stores.iter().find(|s| &s.name == name),
        };
        found.ok_or_else(|| StoreError::UnknownSubStore(sub_store.to_string()))
    }

    /// Target for an insert, decided by the record's full payload.
    pub async fn route_insert(&self, payload: &Payload) -> StoreResult<Target> {
        self.route(payload).await
    }

    /// Single target owning `fields`; main when no ready sub-store matches.
    pub async fn route(&self, fields: &Filters) -> StoreResult<Target> {
        let mut ready = Vec::new();
        for sub in self.sub_stores.iter().filter(|s| s.owns(fields)) {
            if self.status.is_ready(&sub.name).await {
                ready.push(sub);
            } else {
                debug!(sub_store = %sub.name, "matching sub-store not ready");
            }
        }

        if self.strict && ready.len() > 1 {
            return Err(StoreError::RoutingAmbiguity {
                matches: ready.iter().map(|s| s.name.clone()).collect(),
            });
        }

        Ok(match ready.first() {
            Some(sub) => {
                debug!(sub_store = %sub.name, "routed to sub-store");
                Target {
                    origin: StoreOrigin::SubStore(sub.name.clone()),
                    store: sub.store.clone(),
                }
            }
            None => self.main_target(),
        })
    }

    /// Targets for a read. A non-empty metadata filter picks one store
    /// (matched together with the scope constraints in `effective`);
    /// otherwise main and every ready sub-store.
    pub async fn route_read(
        &self,
        metadata: Option<&Filters>,
        effective: &Filters,
    ) -> StoreResult<Vec<Target>> {
        match metadata {
            Some(filters) if !filters.is_empty() => Ok(vec![self.route(effective).await?]),
            _ => Ok(self.ready_targets().await),
        }
    }

    /// Main first, then every ready sub-store in configuration order.
    pub async fn ready_targets(&self) -> Vec<Target> {
        let mut targets = vec![self.main_target()];
        for sub in &self.sub_stores {
            if self.status.is_ready(&sub.name).await {
                targets.push(Target {
                    origin: StoreOrigin::SubStore(sub.name.clone()),
                    store: sub.store.clone(),
                });
            }
        }
        targets
    }
}
