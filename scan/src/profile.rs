//! Short-lived profile cache.
//!
//! One cache is created by the caller and passed into a scan (or a batch of
//! scans). Nothing survives past the value itself.

use std::collections::HashMap;

use walkworthy_core::records::UserProfile;

use crate::store::{ScanRepository, StoreError};

#[derive(Debug, Default)]
pub struct ProfileCache {
    entries: HashMap<String, Option<UserProfile>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached profile for `user_id`, loading it from the store on first use.
    /// A missing or non-object record is cached as `None`.
    pub async fn get_or_load(
        &mut self,
        repo: &ScanRepository,
        user_id: &str,
    ) -> Result<Option<UserProfile>, StoreError> {
        if let Some(cached) = self.entries.get(user_id) {
            return Ok(cached.clone());
        }

        let raw = repo.load_profile(user_id).await?;
        let parsed = UserProfile::parse(raw.as_ref());
        if raw.is_some() && !parsed.valid {
            tracing::warn!(user_id, "profile record has unexpected field types, using what parsed");
        }
        self.entries.insert(user_id.to_string(), parsed.value.clone());
        Ok(parsed.value)
    }

    pub fn invalidate(&mut self, user_id: &str) {
        self.entries.remove(user_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::store::{KvStore, MemoryKvStore, keys};

    async fn repo_with_profile(major: &str) -> (Arc<MemoryKvStore>, ScanRepository) {
        let store = Arc::new(MemoryKvStore::new());
        store
            .put(&keys::user("u1"), keys::PROFILE, json!({ "major": major }))
            .await
            .unwrap();
        (store.clone(), ScanRepository::new(store))
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (store, repo) = repo_with_profile("History").await;
        let mut cache = ProfileCache::new();

        let first = cache.get_or_load(&repo, "u1").await.unwrap().unwrap();
        assert_eq!(first.major.as_deref(), Some("History"));

        store
            .put(&keys::user("u1"), keys::PROFILE, json!({ "major": "Biology" }))
            .await
            .unwrap();
        let second = cache.get_or_load(&repo, "u1").await.unwrap().unwrap();
        assert_eq!(second.major.as_deref(), Some("History"));

        cache.invalidate("u1");
        let third = cache.get_or_load(&repo, "u1").await.unwrap().unwrap();
        assert_eq!(third.major.as_deref(), Some("Biology"));
    }

    #[tokio::test]
    async fn missing_profile_is_cached_as_none() {
        let (_store, repo) = repo_with_profile("History").await;
        let mut cache = ProfileCache::new();
        assert!(cache.get_or_load(&repo, "nobody").await.unwrap().is_none());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
