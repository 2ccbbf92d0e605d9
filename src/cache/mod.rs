//! Named, versioned response stores.
//!
//! This module provides:
//! - [`CacheStorage`], the platform cache primitive (named stores of
//!   request key → response snapshot, no TTL of its own)
//! - an in-memory and an on-disk implementation of it
//! - [`CacheRegistry`], which maps store names to their freshness policy,
//!   performs cross-store lookups and evicts stale generations

mod disk;
mod registry;
mod storage;

pub use disk::DiskCacheStorage;
pub use registry::{CacheHit, CacheRegistry, MatchScope};
pub use storage::{CacheStorage, CachedEntry, MemoryCacheStorage};
