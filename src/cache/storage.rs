//! Cache storage trait and in-memory implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::http::Response;

/// A response snapshot together with the time it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CachedEntry {
    /// Wraps a response stored now.
    #[must_use]
    pub fn new(response: Response) -> Self {
        Self {
            response,
            stored_at: Utc::now(),
        }
    }

    /// Wraps a response with an explicit storage time.
    #[must_use]
    pub const fn stored_at(response: Response, stored_at: DateTime<Utc>) -> Self {
        Self {
            response,
            stored_at,
        }
    }

    /// True once `now - stored_at` exceeds `max_age`.
    #[must_use]
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(max_age)
            .is_ok_and(|max_age| now.signed_duration_since(self.stored_at) > max_age)
    }
}

/// Trait for cache storage backends.
///
/// Mirrors the platform cache primitive: stores are created on first use,
/// `put` overwrites, and there is no expiry. Freshness is the caller's job.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the store if it does not exist yet.
    async fn open(&self, store: &str) -> Result<()>;

    /// Stores an entry, creating the store if needed and replacing any
    /// previous entry for the key.
    async fn put(&self, store: &str, key: &str, entry: CachedEntry) -> Result<()>;

    /// Looks up one key in one store.
    async fn get(&self, store: &str, key: &str) -> Result<Option<CachedEntry>>;

    /// Lists store names.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Lists the request keys held by a store.
    async fn entries(&self, store: &str) -> Result<Vec<String>>;

    /// Deletes a store. Returns false if it did not exist.
    async fn delete(&self, store: &str) -> Result<bool>;
}

/// In-process storage. Stores are listed in creation order.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    stores: RwLock<Vec<(String, HashMap<String, CachedEntry>)>>,
}

impl MemoryCacheStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, store: &str) -> Result<()> {
        let mut stores = self.stores.write().await;
        if !stores.iter().any(|(name, _)| name == store) {
            stores.push((store.to_string(), HashMap::new()));
        }
        Ok(())
    }

    async fn put(&self, store: &str, key: &str, entry: CachedEntry) -> Result<()> {
        let mut stores = self.stores.write().await;
        if let Some((_, entries)) = stores.iter_mut().find(|(name, _)| name == store) {
            entries.insert(key.to_string(), entry);
        } else {
            stores.push((
                store.to_string(),
                HashMap::from([(key.to_string(), entry)]),
            ));
        }
        Ok(())
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<CachedEntry>> {
        let stores = self.stores.read().await;
        Ok(stores
            .iter()
            .find(|(name, _)| name == store)
            .and_then(|(_, entries)| entries.get(key).cloned()))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let stores = self.stores.read().await;
        Ok(stores.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn entries(&self, store: &str) -> Result<Vec<String>> {
        let stores = self.stores.read().await;
        let mut keys: Vec<String> = stores
            .iter()
            .find(|(name, _)| name == store)
            .map(|(_, entries)| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, store: &str) -> Result<bool> {
        let mut stores = self.stores.write().await;
        let before = stores.len();
        stores.retain(|(name, _)| name != store);
        Ok(stores.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_is_idempotent_and_ordered() {
        let storage = MemoryCacheStorage::new();
        storage.open("b").await.unwrap();
        storage.open("a").await.unwrap();
        storage.open("b").await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let storage = MemoryCacheStorage::new();
        storage
            .put("s", "k", CachedEntry::new(Response::text(200, "one")))
            .await
            .unwrap();
        storage
            .put("s", "k", CachedEntry::new(Response::text(200, "two")))
            .await
            .unwrap();

        let entry = storage.get("s", "k").await.unwrap().unwrap();
        assert_eq!(entry.response.text_body(), "two");
        assert_eq!(storage.entries("s").await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let storage = MemoryCacheStorage::new();
        storage.open("s").await.unwrap();
        assert!(storage.delete("s").await.unwrap());
        assert!(!storage.delete("s").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
        assert!(storage.get("s", "k").await.unwrap().is_none());
    }

    #[test]
    fn staleness_uses_max_age() {
        let now = Utc::now();
        let entry = CachedEntry::stored_at(
            Response::new(200, ""),
            now - chrono::Duration::seconds(120),
        );
        assert!(entry.is_stale(Duration::from_secs(60), now));
        assert!(!entry.is_stale(Duration::from_secs(300), now));
    }
}
