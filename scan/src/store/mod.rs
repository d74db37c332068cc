//! Persistence gateway.
//!
//! Everything is modelled as a key-value table partitioned by user
//! (`pk = USER#<id>`) with typed sort keys. [`KvStore`] is the raw seam;
//! [`ScanRepository`] is the typed view the orchestrator and delivery code use.

mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use walkworthy_core::records::{PendingEncouragement, ScanLog, iso_timestamp};

pub use memory::MemoryKvStore;
pub use postgres::PgKvStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record {pk}/{sk} could not be encoded: {source}")]
    Encode {
        pk: String,
        sk: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {pk}/{sk} already exists")]
    AlreadyExists { pk: String, sk: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KvItem {
    pub pk: String,
    pub sk: String,
    pub data: Value,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or replace a whole record.
    async fn put(&self, pk: &str, sk: &str, data: Value) -> Result<(), StoreError>;

    /// Insert only. Returns false, leaving the stored record untouched, when the key is taken.
    async fn put_new(&self, pk: &str, sk: &str, data: Value) -> Result<bool, StoreError>;

    /// All records in a partition whose sort key starts with `sk_prefix`, ordered by sort key.
    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Vec<KvItem>, StoreError>;

    /// Shallow-merge `fields` into an existing record. Returns false when the record does not exist.
    async fn update(
        &self,
        pk: &str,
        sk: &str,
        fields: Map<String, Value>,
    ) -> Result<bool, StoreError>;

    /// Partition keys of every record stored under exactly `sk`.
    async fn partitions_with(&self, sk: &str) -> Result<Vec<String>, StoreError>;
}

pub mod keys {
    pub const USER_PREFIX: &str = "USER#";
    pub const CANVAS_LINK: &str = "CANVAS_LINK";
    pub const PROFILE: &str = "PROFILE";
    pub const PENDING_PREFIX: &str = "PENDING#";
    pub const SCAN_PREFIX: &str = "SCAN#";

    pub fn user(user_id: &str) -> String {
        format!("{USER_PREFIX}{user_id}")
    }

    pub fn pending(encouragement_id: &str) -> String {
        format!("{PENDING_PREFIX}{encouragement_id}")
    }

    /// Sorts by time; the encouragement id keeps same-millisecond scans apart.
    pub fn scan(created_at_iso: &str, encouragement_id: &str) -> String {
        format!("{SCAN_PREFIX}{created_at_iso}#{encouragement_id}")
    }
}

#[derive(Clone)]
pub struct ScanRepository {
    store: Arc<dyn KvStore>,
}

impl ScanRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub async fn load_link(&self, user_id: &str) -> Result<Option<Value>, StoreError> {
        self.store.get(&keys::user(user_id), keys::CANVAS_LINK).await
    }

    pub async fn load_profile(&self, user_id: &str) -> Result<Option<Value>, StoreError> {
        self.store.get(&keys::user(user_id), keys::PROFILE).await
    }

    /// Raw pending records, including ones that no longer decode cleanly.
    pub async fn pending_records(&self, user_id: &str) -> Result<Vec<KvItem>, StoreError> {
        self.store
            .query_prefix(&keys::user(user_id), keys::PENDING_PREFIX)
            .await
    }

    pub async fn pending_encouragements(
        &self,
        user_id: &str,
    ) -> Result<Vec<PendingEncouragement>, StoreError> {
        let items = self.pending_records(user_id).await?;
        Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item.data) {
                Ok(pending) => Some(pending),
                Err(err) => {
                    tracing::warn!(user_id, sk = %item.sk, error = %err, "skipping undecodable pending record");
                    None
                }
            })
            .collect())
    }

    pub async fn get_pending(
        &self,
        user_id: &str,
        encouragement_id: &str,
    ) -> Result<Option<PendingEncouragement>, StoreError> {
        let raw = self
            .store
            .get(&keys::user(user_id), &keys::pending(encouragement_id))
            .await?;
        Ok(raw.and_then(|data| serde_json::from_value(data).ok()))
    }

    /// Flip `delivered` on one pending record. Returns false when it does not exist.
    pub async fn mark_delivered(
        &self,
        user_id: &str,
        sort_key: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut fields = Map::new();
        fields.insert("delivered".to_string(), json!(true));
        fields.insert("deliveredAt".to_string(), json!(iso_timestamp(at)));
        self.store
            .update(&keys::user(user_id), sort_key, fields)
            .await
    }

    pub async fn put_pending(
        &self,
        user_id: &str,
        pending: &PendingEncouragement,
    ) -> Result<(), StoreError> {
        let pk = keys::user(user_id);
        let sk = keys::pending(&pending.id);
        let data = serde_json::to_value(pending).map_err(|source| StoreError::Encode {
            pk: pk.clone(),
            sk: sk.clone(),
            source,
        })?;
        self.store.put(&pk, &sk, data).await
    }

    /// Scan logs are append-only: an existing key is an error, never overwritten.
    pub async fn put_scan_log(&self, user_id: &str, log: &ScanLog) -> Result<(), StoreError> {
        let pk = keys::user(user_id);
        let sk = keys::scan(&log.created_at, &log.encouragement_id);
        let data = serde_json::to_value(log).map_err(|source| StoreError::Encode {
            pk: pk.clone(),
            sk: sk.clone(),
            source,
        })?;
        if self.store.put_new(&pk, &sk, data).await? {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists { pk, sk })
        }
    }

    pub async fn scan_logs(&self, user_id: &str) -> Result<Vec<ScanLog>, StoreError> {
        let items = self
            .store
            .query_prefix(&keys::user(user_id), keys::SCAN_PREFIX)
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item.data).ok())
            .collect())
    }

    /// User ids that have a Canvas link record, in store order.
    pub async fn linked_users(&self) -> Result<Vec<String>, StoreError> {
        let partitions = self.store.partitions_with(keys::CANVAS_LINK).await?;
        Ok(partitions
            .into_iter()
            .filter_map(|pk| pk.strip_prefix(keys::USER_PREFIX).map(ToString::to_string))
            .filter(|id| !id.is_empty())
            .collect())
    }
}
