//! Install, activate and update flow.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{StreamExt, stream};
use url::Url;

use crate::cache::{CacheRegistry, CacheStorage};
use crate::clients::Clients;
use crate::config::{EngineConfig, StorePurpose};
use crate::error::{Error, Result};
use crate::http::Request;
use crate::network::Network;

/// Number of manifest entries fetched concurrently while pre-caching.
const PRECACHE_CONCURRENCY: usize = 6;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Registered, no install event yet.
    Parsed,
    Installing,
    /// Installed, not yet allowed to take over.
    Waiting,
    Activating,
    Active,
    /// Superseded; ignores further lifecycle events.
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Waiting => "waiting",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// A manifest entry that could not be pre-cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of populating the static store from the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
    pub cached: usize,
    pub failed: Vec<PrecacheFailure>,
}

/// Outcome of an install event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub precache: PrecacheReport,
    /// True when the worker may activate right away: skip-waiting was
    /// requested or there is no active worker to replace.
    pub activate_now: bool,
}

/// Outcome of an activate event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stores deleted because they belong to an older generation.
    pub evicted: Vec<String>,
    /// Pages taken over without a reload.
    pub claimed: usize,
}

/// Drives the worker through install and activation.
pub struct Lifecycle<N, S>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    network: Arc<N>,
    registry: Arc<CacheRegistry<S>>,
    config: Arc<EngineConfig>,
    state: Mutex<LifecycleState>,
    skip_waiting: AtomicBool,
}

impl<N, S> Lifecycle<N, S>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    /// Creates a lifecycle manager in the `Parsed` state.
    #[must_use]
    pub const fn new(network: Arc<N>, registry: Arc<CacheRegistry<S>>, config: Arc<EngineConfig>) -> Self {
        Self {
            network,
            registry,
            config,
            state: Mutex::new(LifecycleState::Parsed),
            skip_waiting: AtomicBool::new(false),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once skip-waiting has been requested.
    #[must_use]
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Moves to `to` if the current state is one of `from`.
    fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !from.contains(&state) {
            return Err(Error::InvalidTransition {
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        log::info!("Worker {} -> {to}", *state);
        *state = to;
        Ok(())
    }

    /// Handles the install event: pre-caches the manifest and moves to
    /// `Waiting`. Pre-cache failures are logged, never fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless the worker is `Parsed`.
    pub async fn install(&self, replacing_active: bool) -> Result<InstallReport> {
        self.transition(&[LifecycleState::Parsed], LifecycleState::Installing)?;
        if self.config.lifecycle.skip_waiting_on_install {
            self.skip_waiting.store(true, Ordering::Release);
        }

        let precache = self.precache().await;
        if !precache.failed.is_empty() {
            log::warn!(
                "Pre-cached {} of {} assets; installing anyway",
                precache.cached,
                precache.cached + precache.failed.len()
            );
        }

        self.transition(&[LifecycleState::Installing], LifecycleState::Waiting)?;
        let activate_now = self.skip_waiting_requested() || !replacing_active;
        if !activate_now {
            log::info!("New version installed; waiting for SKIP_WAITING");
        }
        Ok(InstallReport {
            precache,
            activate_now,
        })
    }

    /// Records a skip-waiting request. Returns true if the worker is
    /// `Waiting` and should now activate.
    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting.store(true, Ordering::Release);
        self.state() == LifecycleState::Waiting
    }

    /// Handles the activate event: evicts every store outside the current
    /// generation, then claims all open pages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless the worker is `Waiting`.
    pub async fn activate<C: Clients + ?Sized>(&self, clients: &C) -> Result<ActivationReport> {
        self.transition(&[LifecycleState::Waiting], LifecycleState::Activating)?;

        // Eviction must finish before any page is claimed.
        let evicted = match self
            .registry
            .evict_generations_not_in(&self.config.current_store_names())
            .await
        {
            Ok(evicted) => evicted,
            Err(e) => {
                log::error!("Cache eviction failed: {e}");
                Vec::new()
            }
        };

        let claimed = match clients.claim().await {
            Ok(n) => n,
            Err(e) => {
                log::error!("Failed to claim clients: {e}");
                0
            }
        };

        self.transition(&[LifecycleState::Activating], LifecycleState::Active)?;
        Ok(ActivationReport { evicted, claimed })
    }

    /// Re-populates the current static store from the manifest outside the
    /// install cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the worker is redundant.
    pub async fn recache_manifest(&self) -> Result<PrecacheReport> {
        let state = self.state();
        if state == LifecycleState::Redundant {
            return Err(Error::InvalidTransition {
                from: state.to_string(),
                to: "recache".to_string(),
            });
        }
        log::info!("Refreshing pre-cached assets");
        Ok(self.precache().await)
    }

    /// Marks the worker as superseded.
    pub fn mark_redundant(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != LifecycleState::Redundant {
            log::info!("Worker {} -> {}", *state, LifecycleState::Redundant);
            *state = LifecycleState::Redundant;
        }
    }

    /// Fetches every manifest entry into the static store.
    async fn precache(&self) -> PrecacheReport {
        let store = self.config.store_name(StorePurpose::StaticAssets);
        if let Err(e) = self.registry.open(&store).await {
            log::warn!("Failed to open {store}: {e}");
        }

        let results: Vec<std::result::Result<(), PrecacheFailure>> =
            stream::iter(&self.config.precache)
                .map(|path| {
                    let store = store.as_str();
                    async move {
                        self.precache_one(store, path)
                            .await
                            .map_err(|reason| PrecacheFailure {
                                path: path.clone(),
                                reason,
                            })
                    }
                })
                .buffer_unordered(PRECACHE_CONCURRENCY)
                .collect()
                .await;

        let mut report = PrecacheReport::default();
        for result in results {
            match result {
                Ok(()) => report.cached += 1,
                Err(failure) => {
                    log::warn!("Pre-cache failed for {}: {}", failure.path, failure.reason);
                    report.failed.push(failure);
                }
            }
        }
        report
    }

    async fn precache_one(&self, store: &str, path: &str) -> std::result::Result<(), String> {
        let url: Url = self.config.resolve(path).map_err(|e| e.to_string())?;
        let request = Request::get(url);
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|e| e.to_string())?;
        if !response.ok() {
            return Err(format!("HTTP {}", response.status));
        }
        self.registry
            .put(store, &request.cache_key(), response)
            .await
            .map_err(|e| e.to_string())
    }
}
