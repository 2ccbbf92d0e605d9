//! Fetch strategies.
//!
//! Each strategy turns an intercepted request into exactly one response:
//! from the network, from a cache store, or synthesized. Network failures
//! never escape; cache writes happen in the background and never delay or
//! alter the response.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::task::TaskTracker;

use crate::cache::{CacheHit, CacheRegistry, CacheStorage, MatchScope};
use crate::classify::ResourceClass;
use crate::config::{EngineConfig, StorePurpose};
use crate::http::{Request, Response};
use crate::message::timestamp_now;
use crate::network::Network;

/// Body of the synthesized API response when offline with nothing cached.
pub const OFFLINE_API_ERROR: &str = "Network error. App is running in offline mode.";

/// Image served when an image cannot be fetched and is not cached.
pub const PLACEHOLDER_SVG: &str = concat!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200">"##,
    r##"<rect width="200" height="200" fill="#e8f5e9"/>"##,
    r##"<text x="100" y="105" font-family="sans-serif" font-size="14" fill="#2e7d32" text-anchor="middle">Image offline</text>"##,
    "</svg>"
);

/// Document served for a failed navigation when the configured offline page
/// is not cached either.
pub const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>LawnSync - Offline</title>
</head>
<body>
<h1>You're offline</h1>
<p>LawnSync can't reach the network right now. Changes you make will sync when you're back online.</p>
</body>
</html>
"#;

/// When a network response may be written to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WritePolicy {
    /// Any response, whatever its status.
    Always,
    /// Only 2xx responses.
    OnlyOk,
}

impl WritePolicy {
    const fn allows(self, response: &Response) -> bool {
        match self {
            Self::Always => true,
            Self::OnlyOk => response.ok(),
        }
    }
}

/// Executes the strategy for a classified request.
pub struct StrategyExecutor<N, S>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    network: Arc<N>,
    registry: Arc<CacheRegistry<S>>,
    config: Arc<EngineConfig>,
    writes: TaskTracker,
}

impl<N, S> Clone for StrategyExecutor<N, S>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    fn clone(&self) -> Self {
        Self {
            network: Arc::clone(&self.network),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            writes: self.writes.clone(),
        }
    }
}

impl<N, S> StrategyExecutor<N, S>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    /// Creates an executor over shared network, registry and config.
    #[must_use]
    pub fn new(network: Arc<N>, registry: Arc<CacheRegistry<S>>, config: Arc<EngineConfig>) -> Self {
        Self {
            network,
            registry,
            config,
            writes: TaskTracker::new(),
        }
    }

    /// Runs the strategy for `class`. Always yields a response.
    pub async fn execute(&self, class: ResourceClass, request: &Request) -> Response {
        log::debug!("{class} {}", request.url);
        match class {
            ResourceClass::Api => self.network_first_api(request).await,
            ResourceClass::Image => self.cache_first_image(request).await,
            ResourceClass::Navigate => self.navigate(request).await,
            ResourceClass::Static => self.cache_first_static(request).await,
        }
    }

    /// Waits until every background cache write started so far has finished.
    pub async fn settle(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Network first; successful responses are cached, network failures
    /// fall back to any cached copy, then to a `503` JSON body.
    async fn network_first_api(&self, request: &Request) -> Response {
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.cache_in_background(
                        StorePurpose::ApiResponses,
                        request.cache_key(),
                        response.clone(),
                    );
                }
                response
            }
            Err(e) => {
                log::warn!("API fetch failed for {}: {e}", request.url);
                if let Some(hit) = self.lookup(&request.cache_key()).await {
                    return hit.into_response();
                }
                Response::json(
                    503,
                    &json!({
                        "error": OFFLINE_API_ERROR,
                        "offline": true,
                        "timestamp": timestamp_now(),
                    }),
                )
            }
        }
    }

    /// Cache first. Network responses are cached whatever their status.
    async fn cache_first_image(&self, request: &Request) -> Response {
        self.cache_first(request, StorePurpose::Images, WritePolicy::Always, || {
            Response::new(200, PLACEHOLDER_SVG).with_header("content-type", "image/svg+xml")
        })
        .await
    }

    /// Network first, never cached; offline falls back to the cached page,
    /// then the offline document.
    async fn navigate(&self, request: &Request) -> Response {
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Navigation to {} failed: {e}", request.url);
                if let Some(hit) = self.lookup(&request.cache_key()).await {
                    return hit.into_response();
                }
                self.offline_document().await
            }
        }
    }

    /// Cache first; successful network responses go to the dynamic store.
    async fn cache_first_static(&self, request: &Request) -> Response {
        self.cache_first(
            request,
            StorePurpose::DynamicPages,
            WritePolicy::OnlyOk,
            || Response::text(503, "Network error"),
        )
        .await
    }

    async fn cache_first(
        &self,
        request: &Request,
        target: StorePurpose,
        policy: WritePolicy,
        fallback: impl FnOnce() -> Response + Send,
    ) -> Response {
        let key = request.cache_key();
        let stale = match self.lookup(&key).await {
            Some(hit) if !self.is_expired(&hit) => return hit.into_response(),
            other => other,
        };

        match self.network.fetch(request).await {
            Ok(response) => {
                if policy.allows(&response) {
                    self.cache_in_background(target, key, response.clone());
                }
                response
            }
            Err(e) => {
                if let Some(hit) = stale {
                    log::info!("Serving stale {} from {} while offline", request.url, hit.store);
                    return hit.into_response();
                }
                log::warn!("Fetch failed for {}: {e}", request.url);
                fallback()
            }
        }
    }

    fn is_expired(&self, hit: &CacheHit) -> bool {
        self.config.freshness.enforce_max_age && self.registry.is_stale(hit, Utc::now())
    }

    /// The configured offline page from cache, or the built-in one.
    async fn offline_document(&self) -> Response {
        let cached = match self.config.offline_page_url() {
            Ok(url) => self.lookup(&Request::get(url).cache_key()).await,
            Err(e) => {
                log::warn!("Offline page path is not resolvable: {e}");
                None
            }
        };
        cached.map_or_else(
            || Response::new(200, OFFLINE_HTML).with_header("content-type", "text/html; charset=utf-8"),
            CacheHit::into_response,
        )
    }

    /// Looks a key up in every store; read errors count as a miss.
    async fn lookup(&self, key: &str) -> Option<CacheHit> {
        match self.registry.lookup(key, MatchScope::Any).await {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("Cache lookup failed for {key}: {e}");
                None
            }
        }
    }

    fn cache_in_background(&self, purpose: StorePurpose, key: String, response: Response) {
        let registry = Arc::clone(&self.registry);
        let store = self.config.store_name(purpose);
        self.writes.spawn(async move {
            if let Err(e) = registry.put(&store, &key, response).await {
                log::warn!("Failed to cache {key} in {store}: {e}");
            }
        });
    }
}
