use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{KvItem, KvStore, StoreError};

/// Process-local store for tests and offline runs. Ordered like the Postgres
/// table so prefix queries come back sorted by sort key.
#[derive(Default)]
pub struct MemoryKvStore {
    items: RwLock<BTreeMap<(String, String), Value>>,
    fail_updates: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update` fail, to exercise partial-write handling.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<Value>, StoreError> {
        let items = self.items.read().await;
        Ok(items.get(&(pk.to_string(), sk.to_string())).cloned())
    }

    async fn put(&self, pk: &str, sk: &str, data: Value) -> Result<(), StoreError> {
        self.items
            .write()
            .await
            .insert((pk.to_string(), sk.to_string()), data);
        Ok(())
    }

    async fn put_new(&self, pk: &str, sk: &str, data: Value) -> Result<bool, StoreError> {
        let mut items = self.items.write().await;
        match items.entry((pk.to_string(), sk.to_string())) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(data);
                Ok(true)
            }
        }
    }

    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Vec<KvItem>, StoreError> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|((p, s), _)| p == pk && s.starts_with(sk_prefix))
            .map(|((p, s), data)| KvItem {
                pk: p.clone(),
                sk: s.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn update(
        &self,
        pk: &str,
        sk: &str,
        fields: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("update rejected for {pk}/{sk}")));
        }
        let mut items = self.items.write().await;
        let Some(existing) = items.get_mut(&(pk.to_string(), sk.to_string())) else {
            return Ok(false);
        };
        match existing {
            Value::Object(map) => map.extend(fields),
            other => *other = Value::Object(fields),
        }
        Ok(true)
    }

    async fn partitions_with(&self, sk: &str) -> Result<Vec<String>, StoreError> {
        let items = self.items.read().await;
        Ok(items
            .keys()
            .filter(|(_, s)| s == sk)
            .map(|(p, _)| p.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn update_merges_fields_shallowly() {
        let store = MemoryKvStore::new();
        store
            .put("USER#u", "PENDING#1", json!({"id": "1", "delivered": false}))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("delivered".to_string(), json!(true));
        assert!(store.update("USER#u", "PENDING#1", fields).await.unwrap());

        let stored = store.get("USER#u", "PENDING#1").await.unwrap().unwrap();
        assert_eq!(stored, json!({"id": "1", "delivered": true}));
    }

    #[tokio::test]
    async fn put_new_leaves_existing_records_alone() {
        let store = MemoryKvStore::new();
        assert!(store.put_new("USER#u", "SCAN#1", json!(1)).await.unwrap());
        assert!(!store.put_new("USER#u", "SCAN#1", json!(2)).await.unwrap());
        assert_eq!(store.get("USER#u", "SCAN#1").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn prefix_query_is_partition_scoped_and_sorted() {
        let store = MemoryKvStore::new();
        store.put("USER#a", "SCAN#2", json!(2)).await.unwrap();
        store.put("USER#a", "SCAN#1", json!(1)).await.unwrap();
        store.put("USER#a", "PROFILE", json!({})).await.unwrap();
        store.put("USER#b", "SCAN#3", json!(3)).await.unwrap();

        let items = store.query_prefix("USER#a", "SCAN#").await.unwrap();
        let sks: Vec<_> = items.iter().map(|i| i.sk.as_str()).collect();
        assert_eq!(sks, vec!["SCAN#1", "SCAN#2"]);
    }
}
