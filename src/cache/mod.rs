//! Offline resource cache.
//!
//! This module provides the cache-first resolution used for every page
//! resource:
//! - Precaches a manifest of resources in a single all-or-nothing write
//! - Serves stored entries without touching the network
//! - Writes network responses back in the background (last write wins)
//! - Falls back to a designated page when lookup or network fails

mod layer;
mod storage;
mod types;

pub use layer::OfflineCache;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use types::{Request, RequestKey, Resolution, ResponseSnapshot};
#[cfg(test)]
pub use types::{CachedEntry, ResponseSource};
