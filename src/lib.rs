//! lawnsync-worker - Offline caching and background-sync engine for the
//! LawnSync web app.
//!
//! The engine sits between the app's pages and the network. It answers
//! intercepted requests from versioned cache stores, keeps the pre-cached
//! shell current across releases, relays background-sync triggers to open
//! pages and turns push messages into notifications. Platform primitives
//! (network, cache storage, pages, notifications) are traits, so the engine
//! runs the same against real HTTP and disk or in-memory doubles.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lawnsync_worker::{
//!     ChannelClients, DiskCacheStorage, EngineConfig, EventOutcome, HttpNetwork, LogNotifier,
//!     Request, Worker, WorkerEvent,
//! };
//!
//! # async fn example() -> lawnsync_worker::Result<()> {
//! let config = EngineConfig::default();
//! let clients = Arc::new(ChannelClients::new());
//! let worker = Worker::new(
//!     config,
//!     HttpNetwork::new()?,
//!     DiskCacheStorage::new(DiskCacheStorage::default_root()),
//!     Arc::clone(&clients),
//!     LogNotifier,
//! )?;
//!
//! // Pre-cache the shell, then take over open pages
//! worker.dispatch(WorkerEvent::Install { replacing_active: false }).await?;
//! worker.dispatch(WorkerEvent::Activate).await?;
//!
//! // Answer a request, from the network or the cache
//! let url = worker.config().resolve("/static/css/main.css")?;
//! if let EventOutcome::Fetched(Some(response)) =
//!     worker.dispatch(WorkerEvent::Fetch(Request::get(url))).await?
//! {
//!     println!("{} {}", response.status, response.status_text);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod message;
pub mod network;
pub mod notification;
pub mod strategy;
pub mod sync;
pub mod worker;

// Re-export main types for convenience
pub use cache::{CacheRegistry, CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use classify::{ResourceClass, classify};
pub use clients::{ChannelClients, ClientHandle, ClientId, ClientInfo, Clients};
pub use config::{EngineConfig, StorePurpose};
pub use error::{Error, Result};
pub use http::{Request, RequestMode, Response};
pub use lifecycle::LifecycleState;
pub use message::ClientMessage;
pub use network::{HttpNetwork, Network, OfflineNetwork};
pub use notification::{LogNotifier, Notification, Notifier};
pub use worker::{EventOutcome, FetchDisposition, Worker, WorkerEvent};
