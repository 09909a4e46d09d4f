//! Row definitions for Mnemo SurrealDB tables
//!
//! Tables:
//! - one table per collection: memory records (vector + payload)
//! - memory_migrations: migration records keyed by (collection, sub-store)
//!
//! Vectors, payloads and routing filters are stored as serialized JSON
//! strings so values round-trip exactly regardless of backend number types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::id::RecordId;
use crate::storage_traits::{Filters, MigrationRecord, Payload, Record, StoreResult};

/// Module for serializing chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Name of the shared migration bookkeeping table.
pub const MIGRATIONS_TABLE: &str = "memory_migrations";

/// One memory record as stored in a collection table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    /// Generator-assigned id (always below 2^63)
    pub record_id: i64,
    /// JSON array of floats
    pub vector: String,
    /// JSON object
    pub payload: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl MemoryRow {
    pub fn new(id: RecordId, vector: &[f32], payload: &Payload) -> StoreResult<Self> {
        let record_id = i64::try_from(id.0).map_err(|_| {
            StoreError::Validation(format!("record id {id} exceeds the signed 64-bit range"))
        })?;
        Ok(MemoryRow {
            record_id,
            vector: serde_json::to_string(vector)?,
            payload: serde_json::to_string(payload)?,
            created_at: Utc::now(),
        })
    }

    pub fn into_record(self) -> StoreResult<Record> {
        Ok(Record {
            id: RecordId(self.record_id as u64),
            vector: serde_json::from_str(&self.vector)?,
            payload: serde_json::from_str(&self.payload)?,
        })
    }
}

/// Partial update of a memory row; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl MemoryPatch {
    pub fn new(vector: Option<&[f32]>, payload: Option<&Payload>) -> StoreResult<Self> {
        Ok(MemoryPatch {
            vector: vector.map(serde_json::to_string).transpose()?,
            payload: payload.map(serde_json::to_string).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_none() && self.payload.is_none()
    }
}

/// Row of `memory_migrations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRow {
    pub collection_name: String,
    pub sub_store_name: String,
    /// "pending" | "migrating" | "completed" | "failed"
    pub status: String,
    pub migrated_count: u64,
    pub total_count: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    /// JSON object
    pub routing_filter: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationRow {
    pub fn into_record(self) -> StoreResult<MigrationRecord> {
        let routing_filter: Filters = serde_json::from_str(&self.routing_filter)?;
        Ok(MigrationRecord {
            collection_name: self.collection_name,
            sub_store_name: self.sub_store_name,
            status: self.status.parse()?,
            migrated_count: self.migrated_count,
            total_count: self.total_count,
            error_message: self.error_message,
            routing_filter,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

/// Result row of `SELECT count() ... GROUP ALL`.
#[derive(Debug, Deserialize)]
pub struct CountRow {
    pub count: u64,
}

/// Projection used when only ids are needed.
#[derive(Debug, Deserialize)]
pub struct RecordIdRow {
    pub record_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_row_round_trips_vector_and_payload() {
        let payload = json!({"user_id": "u1", "nested": {"k": [1, 2]}, "n": 1.5})
            .as_object()
            .cloned()
            .unwrap();
        let row = MemoryRow::new(RecordId(42), &[0.25, -1.0, 3.5], &payload).unwrap();
        assert_eq!(row.record_id, 42);

        let record = row.into_record().unwrap();
        assert_eq!(record.id, RecordId(42));
        assert_eq!(record.vector, vec![0.25, -1.0, 3.5]);
        assert_eq!(record.payload, payload);
    }

    #[test]
    fn memory_row_rejects_ids_beyond_i64() {
        let err = MemoryRow::new(RecordId(u64::MAX), &[1.0], &Payload::new()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn empty_patch_serializes_to_empty_object() {
        let patch = MemoryPatch::new(None, None).unwrap();
        assert!(patch.is_empty());
        assert_eq!(serde_json::to_string(&patch).unwrap(), "{}");

        let patch = MemoryPatch::new(Some(&[1.0]), None).unwrap();
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"vector":"[1.0]"}"#);
    }

    #[test]
    fn migration_row_rejects_unknown_status() {
        let now = Utc::now();
        let row = MigrationRow {
            collection_name: "memories".into(),
            sub_store_name: "working".into(),
            status: "exploded".into(),
            migrated_count: 0,
            total_count: 0,
            error_message: None,
            routing_filter: "{}".into(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        assert!(row.into_record().is_err());
    }
}
