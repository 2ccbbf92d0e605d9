//! Engine configuration.
//!
//! Every deploy-time constant the engine needs (store names, the pre-cache
//! manifest, API prefixes, the sync tag) lives in one immutable
//! [`EngineConfig`] handed to the worker at startup.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// The four kinds of content the worker keeps separate stores for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePurpose {
    /// App-shell assets pre-cached at install time.
    StaticAssets,
    /// Static resources fetched at runtime.
    DynamicPages,
    /// Images, cached on first fetch.
    Images,
    /// Successful API responses kept for offline fallback.
    ApiResponses,
}

impl StorePurpose {
    /// All purposes, in the order their stores are opened.
    pub const ALL: [Self; 4] = [
        Self::StaticAssets,
        Self::DynamicPages,
        Self::Images,
        Self::ApiResponses,
    ];

    /// Short name used inside the store name.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::StaticAssets => "static",
            Self::DynamicPages => "dynamic",
            Self::Images => "images",
            Self::ApiResponses => "api",
        }
    }
}

/// A named store of the current generation together with its freshness policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    /// Store name, e.g. `lawnsync-static-v1`.
    pub name: String,
    /// What the store holds.
    pub purpose: StorePurpose,
    /// Age after which an entry is considered stale.
    pub max_age: Duration,
}

/// Maximum entry age per store, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreAges {
    pub static_assets: u64,
    pub dynamic_pages: u64,
    pub images: u64,
    pub api_responses: u64,
}

impl Default for StoreAges {
    fn default() -> Self {
        Self {
            static_assets: 7 * 24 * 60 * 60,
            dynamic_pages: 24 * 60 * 60,
            images: 30 * 24 * 60 * 60,
            api_responses: 5 * 60,
        }
    }
}

impl StoreAges {
    /// Returns the configured maximum age for a purpose.
    #[must_use]
    pub const fn for_purpose(&self, purpose: StorePurpose) -> Duration {
        let secs = match purpose {
            StorePurpose::StaticAssets => self.static_assets,
            StorePurpose::DynamicPages => self.dynamic_pages,
            StorePurpose::Images => self.images,
            StorePurpose::ApiResponses => self.api_responses,
        };
        Duration::from_secs(secs)
    }
}

/// Background-sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tag the foreground registers its background sync under.
    pub tag: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: "sync-pending-operations".to_string(),
        }
    }
}

/// Install/activate behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Request activation as soon as install finishes instead of waiting
    /// for a `SKIP_WAITING` message.
    pub skip_waiting_on_install: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            skip_waiting_on_install: true,
        }
    }
}

/// Freshness policy applied by the cache-first strategies.
///
/// Off by default: a cache-first hit is served without touching the
/// network, whatever its age.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Treat entries older than their store's maximum age as misses.
    pub enforce_max_age: bool,
}

/// Defaults used when a push payload omits fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_body: String,
    pub default_icon: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "LawnSync Update".to_string(),
            default_body: "You have a new update from LawnSync".to_string(),
            default_icon: "/icons/icon-192x192.png".to_string(),
        }
    }
}

/// Immutable configuration for one worker generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Origin the worker is registered for; manifest paths resolve against it.
    pub origin: Url,
    /// Prefix shared by every store name.
    pub cache_prefix: String,
    /// Generation suffix. Bumping it evicts every older store on activation.
    pub cache_version: String,
    /// App-shell paths pre-cached at install time.
    pub precache: Vec<String>,
    /// Path of the document served when a navigation fails offline.
    pub offline_page: String,
    /// Path prefixes treated as API endpoints.
    pub api_prefixes: Vec<String>,
    /// Maximum entry age per store.
    pub max_age: StoreAges,
    pub sync: SyncConfig,
    pub lifecycle: LifecycleConfig,
    pub freshness: FreshnessConfig,
    pub notifications: NotificationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut precache: Vec<String> = [
            "/",
            "/offline.html",
            "/static/js/bundle.js",
            "/static/css/main.css",
            "/logo.svg",
            "/manifest.json",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        precache.extend(
            [72, 96, 128, 144, 152, 192, 384, 512]
                .iter()
                .map(|size| format!("/icons/icon-{size}x{size}.png")),
        );

        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("valid default origin"),
            cache_prefix: "lawnsync".to_string(),
            cache_version: "v1".to_string(),
            precache,
            offline_page: "/offline.html".to_string(),
            api_prefixes: [
                "/api/recommendations",
                "/api/weather",
                "/api/schedule",
                "/api/chat",
                "/api/feedback",
                "/api/analytics",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            max_age: StoreAges::default(),
            sync: SyncConfig::default(),
            lifecycle: LifecycleConfig::default(),
            freshness: FreshnessConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the generation suffix.
    #[must_use]
    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Replaces the pre-cache manifest.
    #[must_use]
    pub fn with_precache<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.precache = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the API prefix allowlist.
    #[must_use]
    pub fn with_api_prefixes<I, P>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.api_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether install requests immediate activation.
    #[must_use]
    pub fn with_skip_waiting_on_install(mut self, skip: bool) -> Self {
        self.lifecycle.skip_waiting_on_install = skip;
        self
    }

    /// Sets whether cache-first strategies honour store maximum ages.
    #[must_use]
    pub fn with_enforce_max_age(mut self, enforce: bool) -> Self {
        self.freshness.enforce_max_age = enforce;
        self
    }

    /// Sets the maximum entry ages.
    #[must_use]
    pub fn with_max_age(mut self, ages: StoreAges) -> Self {
        self.max_age = ages;
        self
    }

    /// Returns the current-generation store name for a purpose.
    #[must_use]
    pub fn store_name(&self, purpose: StorePurpose) -> String {
        format!(
            "{}-{}-{}",
            self.cache_prefix,
            purpose.slug(),
            self.cache_version
        )
    }

    /// Returns the four current-generation stores.
    #[must_use]
    pub fn stores(&self) -> Vec<CacheStore> {
        StorePurpose::ALL
            .iter()
            .map(|&purpose| CacheStore {
                name: self.store_name(purpose),
                purpose,
                max_age: self.max_age.for_purpose(purpose),
            })
            .collect()
    }

    /// Returns the current generation set.
    #[must_use]
    pub fn current_store_names(&self) -> HashSet<String> {
        StorePurpose::ALL
            .iter()
            .map(|&purpose| self.store_name(purpose))
            .collect()
    }

    /// Looks up a current-generation store by name.
    #[must_use]
    pub fn store_by_name(&self, name: &str) -> Option<CacheStore> {
        self.stores().into_iter().find(|store| store.name == name)
    }

    /// Resolves a path against the origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined onto the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Resolves every manifest path.
    ///
    /// # Errors
    ///
    /// Returns an error if any manifest path cannot be resolved.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.precache.iter().map(|path| self.resolve(path)).collect()
    }

    /// URL of the offline fallback document.
    ///
    /// # Errors
    ///
    /// Returns an error if the offline page path cannot be resolved.
    pub fn offline_page_url(&self) -> Result<Url> {
        self.resolve(&self.offline_page)
    }

    /// URL of the application root.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin cannot be joined with `/`.
    pub fn root_url(&self) -> Result<Url> {
        self.resolve("/")
    }

    /// Checks the invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        for (field, value) in [
            ("cache_prefix", &self.cache_prefix),
            ("cache_version", &self.cache_version),
        ] {
            if value.is_empty() || !value.chars().all(is_store_name_char) {
                return Err(Error::InvalidConfig(format!(
                    "{field} must be non-empty and contain only [A-Za-z0-9._-], got {value:?}"
                )));
            }
        }
        if self.sync.tag.is_empty() {
            return Err(Error::InvalidConfig("sync.tag must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for path in &self.precache {
            let url = self
                .resolve(path)
                .map_err(|e| Error::InvalidConfig(format!("precache entry {path:?}: {e}")))?;
            if !seen.insert(url) {
                return Err(Error::InvalidConfig(format!(
                    "precache entry {path:?} is listed twice"
                )));
            }
        }
        self.offline_page_url()
            .map_err(|e| Error::InvalidConfig(format!("offline_page: {e}")))?;

        if !self.precache.contains(&self.offline_page) {
            log::warn!(
                "Offline page {} is not in the pre-cache manifest; the built-in page will be used",
                self.offline_page
            );
        }
        Ok(())
    }

    /// Parses and validates a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the result is invalid.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

const fn is_store_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}
