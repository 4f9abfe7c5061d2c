//! Cache layer that orchestrates cache-first lookups with network fetching.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::net::{Network, NetworkResponse};

use super::storage::CacheStorage;
use super::types::{Request, RequestKey, Resolution, ResponseSnapshot};

/// Cache layer that manages the precache and per-request resolution.
///
/// This layer sits between the page and the network client. Stored
/// entries always win over the network; they are never considered stale
/// and are only replaced when a later network response overwrites them.
pub struct OfflineCache<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  /// Served when neither the store nor the network can answer
  fallback: RequestKey,
}

impl<S, N> OfflineCache<S, N>
where
  S: CacheStorage + 'static,
  N: Network,
{
  /// Create a cache layer over shared storage and network handles.
  pub fn from_shared(storage: Arc<S>, network: Arc<N>, fallback: RequestKey) -> Self {
    Self {
      storage,
      network,
      fallback,
    }
  }

  #[cfg(test)]
  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Fetch every manifest entry and store them in one atomic write.
  ///
  /// A rejected fetch, a non-2xx status or an unstorable response fails the
  /// whole install and nothing is written. Returns the number of entries
  /// stored.
  pub async fn install(&self, manifest: &[RequestKey]) -> Result<usize> {
    info!(resources = manifest.len(), "Precaching manifest");

    let fetches = manifest.iter().map(|key| self.precache_one(key));
    let entries = try_join_all(fetches).await?;

    let storage = Arc::clone(&self.storage);
    let count = entries.len();
    tokio::task::spawn_blocking(move || storage.put_all(&entries))
      .await
      .map_err(|e| eyre!("Precache write task failed: {}", e))?
      .map_err(|e| eyre!("Failed to store precached resources: {}", e))?;

    info!(entries = count, "Precache complete");
    Ok(count)
  }

  async fn precache_one(&self, key: &RequestKey) -> Result<(RequestKey, ResponseSnapshot)> {
    let request = Request::new(key.clone());
    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Failed to precache {}: {}", key, e))?;

    match response {
      NetworkResponse::Storable(snapshot) if snapshot.is_ok() => Ok((key.clone(), snapshot)),
      NetworkResponse::Storable(snapshot) => Err(eyre!(
        "Failed to precache {}: server answered {}",
        key,
        snapshot.status
      )),
      NetworkResponse::Uncacheable { reason, .. } => {
        Err(eyre!("Failed to precache {}: {}", key, reason))
      }
    }
  }

  /// Resolve a request cache-first.
  ///
  /// 1. Stored entry for the request: return it, no network call
  /// 2. Miss: fetch from network; storable responses are written back in
  ///    the background and returned immediately
  /// 3. Lookup error or rejected fetch: serve the fallback entry
  ///
  /// Returns `None` when even the fallback is unavailable.
  pub async fn handle(&self, request: &Request) -> Option<Resolution> {
    let key = &request.key;

    match self.storage.get(key) {
      Ok(Some(entry)) => {
        debug!(%key, "Cache hit");
        return Some(Resolution::from_cache(entry));
      }
      Ok(None) => debug!(%key, "Cache miss"),
      Err(e) => {
        error!(%key, error = %e, "Cache lookup failed");
        return self.fallback();
      }
    }

    match self.network.fetch(request).await {
      Ok(NetworkResponse::Storable(snapshot)) if key.is_storable() => {
        self.store_in_background(key.clone(), snapshot.clone());
        Some(Resolution::from_network(snapshot, true))
      }
      Ok(NetworkResponse::Storable(snapshot)) => {
        debug!(%key, "Not storing response to non-GET request");
        Some(Resolution::from_network(snapshot, false))
      }
      Ok(NetworkResponse::Uncacheable { snapshot, reason }) => {
        warn!(%key, %reason, "Invalid network response for caching");
        Some(Resolution::from_network(snapshot, false))
      }
      Err(e) => {
        error!(%key, error = %e, "Fetch failed, falling back to cache");
        self.fallback()
      }
    }
  }

  /// Write a network response without holding up the caller.
  ///
  /// Concurrent writes for the same key are not ordered; the last one to
  /// land wins.
  fn store_in_background(&self, key: RequestKey, snapshot: ResponseSnapshot) {
    let storage = Arc::clone(&self.storage);
    tokio::task::spawn_blocking(move || {
      if let Err(e) = storage.put(&key, &snapshot) {
        error!(%key, error = %e, "Cache put failed");
      }
    });
  }

  fn fallback(&self) -> Option<Resolution> {
    match self.storage.get(&self.fallback) {
      Ok(Some(entry)) => {
        warn!(fallback = %self.fallback, "Serving fallback page");
        Some(Resolution::fallback(entry))
      }
      Ok(None) => {
        error!(fallback = %self.fallback, "Fallback page is not cached; request unresolved");
        None
      }
      Err(e) => {
        error!(fallback = %self.fallback, error = %e, "Fallback lookup failed");
        None
      }
    }
  }
}

impl<S: CacheStorage, N: Network> Clone for OfflineCache<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      fallback: self.fallback.clone(),
    }
  }
}
