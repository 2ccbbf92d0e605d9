//! Store registry: store-name policy, cross-store lookup and generation
//! eviction on top of a [`CacheStorage`] backend.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::storage::{CacheStorage, CachedEntry};
use crate::config::CacheStore;
use crate::error::{Error, Result};
use crate::http::Response;

/// Which stores a lookup may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope<'a> {
    /// Every store this worker knows about, in listing order.
    Any,
    /// Only the named store.
    Store(&'a str),
}

/// A successful lookup and the store it came from.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub store: String,
    pub entry: CachedEntry,
}

impl CacheHit {
    /// Consumes the hit, returning the cached response.
    #[must_use]
    pub fn into_response(self) -> Response {
        self.entry.response
    }
}

/// Registry of named, versioned stores.
pub struct CacheRegistry<S: CacheStorage> {
    storage: S,
    stores: Vec<CacheStore>,
}

impl<S: CacheStorage> CacheRegistry<S> {
    /// Creates a registry for the given current-generation stores.
    #[must_use]
    pub const fn new(storage: S, stores: Vec<CacheStore>) -> Self {
        Self { storage, stores }
    }

    /// Returns the storage backend.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the current-generation stores.
    #[must_use]
    pub fn stores(&self) -> &[CacheStore] {
        &self.stores
    }

    /// Returns the policy of a current-generation store.
    #[must_use]
    pub fn policy(&self, store: &str) -> Option<&CacheStore> {
        self.stores.iter().find(|s| s.name == store)
    }

    /// Opens a store, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot create the store.
    pub async fn open(&self, store: &str) -> Result<()> {
        self.storage.open(store).await
    }

    /// Stores `response` under `request_key`, replacing any previous entry.
    /// Only current-generation stores accept writes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStore`] for a store outside the current
    /// generation, or an error if the backend rejects the write.
    pub async fn put(&self, store: &str, request_key: &str, response: Response) -> Result<()> {
        if self.policy(store).is_none() {
            return Err(Error::UnknownStore(store.to_string()));
        }
        self.storage
            .put(store, request_key, CachedEntry::new(response))
            .await
    }

    /// Looks up a request key. An entry that cannot be read is logged and
    /// treated as a miss in its store, so later stores are still searched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store listing cannot be read.
    pub async fn lookup(
        &self,
        request_key: &str,
        scope: MatchScope<'_>,
    ) -> Result<Option<CacheHit>> {
        let candidates = match scope {
            MatchScope::Store(store) => vec![store.to_string()],
            MatchScope::Any => self.storage.keys().await?,
        };

        for store in candidates {
            match self.storage.get(&store, request_key).await {
                Ok(Some(entry)) => {
                    log::debug!("Cache hit for {request_key} in {store}");
                    return Ok(Some(CacheHit { store, entry }));
                }
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable entry for {request_key} in {store}: {e}"),
            }
        }
        Ok(None)
    }

    /// True if the hit is older than its store's maximum age. Entries from
    /// stores outside the current generation never expire here; they are
    /// removed by eviction instead.
    #[must_use]
    pub fn is_stale(&self, hit: &CacheHit, now: DateTime<Utc>) -> bool {
        self.policy(&hit.store)
            .is_some_and(|policy| hit.entry.is_stale(policy.max_age, now))
    }

    /// Lists every store name.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    pub async fn store_names(&self) -> Result<Vec<String>> {
        self.storage.keys().await
    }

    /// Lists the request keys held by a store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    pub async fn entries(&self, store: &str) -> Result<Vec<String>> {
        self.storage.entries(store).await
    }

    /// Deletes every store whose name is not in `current`.
    ///
    /// Returns the names that were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or deleting fails. Stores deleted before
    /// the failure stay deleted.
    pub async fn evict_generations_not_in(&self, current: &HashSet<String>) -> Result<Vec<String>> {
        let mut evicted = Vec::new();
        for store in self.storage.keys().await? {
            if current.contains(&store) {
                continue;
            }
            if self.storage.delete(&store).await? {
                log::info!("Evicted stale cache store {store}");
                evicted.push(store);
            }
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::config::EngineConfig;

    fn registry() -> CacheRegistry<MemoryCacheStorage> {
        CacheRegistry::new(MemoryCacheStorage::new(), EngineConfig::default().stores())
    }

    #[tokio::test]
    async fn scoped_lookup_ignores_other_stores() {
        let registry = registry();
        registry
            .put("lawnsync-images-v1", "https://a.test/a.png", Response::new(200, "png"))
            .await
            .unwrap();

        assert!(registry
            .lookup("https://a.test/a.png", MatchScope::Store("lawnsync-api-v1"))
            .await
            .unwrap()
            .is_none());
        let hit = registry
            .lookup("https://a.test/a.png", MatchScope::Any)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.store, "lawnsync-images-v1");
    }

    #[tokio::test]
    async fn any_scope_prefers_first_listed_store() {
        let registry = registry();
        registry
            .put("lawnsync-static-v1", "k", Response::text(200, "static"))
            .await
            .unwrap();
        registry
            .put("lawnsync-dynamic-v1", "k", Response::text(200, "dynamic"))
            .await
            .unwrap();

        let hit = registry.lookup("k", MatchScope::Any).await.unwrap().unwrap();
        assert_eq!(hit.into_response().text_body(), "static");
    }

    #[tokio::test]
    async fn unreadable_entry_does_not_hide_later_stores() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = CacheRegistry::new(
            crate::cache::DiskCacheStorage::new(dir.path()),
            EngineConfig::default().stores(),
        );
        let key = "http://localhost:3000/logo.svg";
        registry
            .put("lawnsync-static-v1", key, Response::text(200, "static"))
            .await
            .unwrap();
        registry
            .put("lawnsync-images-v1", key, Response::text(200, "svg"))
            .await
            .unwrap();

        // Corrupt the copy in the store listed first.
        let images = dir.path().join("lawnsync-images-v1");
        let file = std::fs::read_dir(&images).unwrap().next().unwrap().unwrap().path();
        std::fs::write(file, b"{garbage").unwrap();

        let hit = registry.lookup(key, MatchScope::Any).await.unwrap().unwrap();
        assert_eq!(hit.store, "lawnsync-static-v1");
        assert_eq!(hit.into_response().text_body(), "static");
    }

    #[tokio::test]
    async fn writes_to_old_generations_are_rejected() {
        let registry = registry();
        let err = registry
            .put("lawnsync-static-v0", "k", Response::text(200, "old"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownStore(name) if name == "lawnsync-static-v0"));
        assert!(registry.store_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn eviction_keeps_only_current_generation() {
        let registry = registry();
        let config = EngineConfig::default();
        for store in ["lawnsync-static-v0", "lawnsync-api-v0", "unrelated"] {
            registry.open(store).await.unwrap();
        }
        for store in config.current_store_names() {
            registry.open(&store).await.unwrap();
        }

        let mut evicted = registry
            .evict_generations_not_in(&config.current_store_names())
            .await
            .unwrap();
        evicted.sort();
        assert_eq!(
            evicted,
            vec!["lawnsync-api-v0", "lawnsync-static-v0", "unrelated"]
        );

        let remaining: HashSet<String> = registry.store_names().await.unwrap().into_iter().collect();
        assert_eq!(remaining, config.current_store_names());
    }

    #[tokio::test]
    async fn staleness_follows_store_policy() {
        let registry = registry();
        let now = Utc::now();
        let old = CachedEntry::stored_at(Response::new(200, ""), now - chrono::Duration::minutes(10));

        let api_hit = CacheHit {
            store: "lawnsync-api-v1".to_string(),
            entry: old.clone(),
        };
        let image_hit = CacheHit {
            store: "lawnsync-images-v1".to_string(),
            entry: old.clone(),
        };
        let foreign_hit = CacheHit {
            store: "someone-else".to_string(),
            entry: old,
        };

        assert!(registry.is_stale(&api_hit, now));
        assert!(!registry.is_stale(&image_hit, now));
        assert!(!registry.is_stale(&foreign_hit, now));
    }
}
