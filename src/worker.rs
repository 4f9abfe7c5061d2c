//! Worker lifecycle: which offline cache, if any, controls requests.

use color_eyre::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::{CacheStorage, OfflineCache, Request, RequestKey, Resolution};
use crate::net::Network;

/// Lifecycle state of the most recently registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Precache in progress
  Installing,
  /// Install succeeded; the worker controls requests
  Activated,
  /// Install failed; the worker will never control requests
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Installing => "installing",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// Holds the active offline cache and routes requests through it.
///
/// Without an active worker requests are uncontrolled and go straight to
/// the network with no caching and no fallback.
pub struct Registration<S: CacheStorage, N: Network> {
  network: Arc<N>,
  active: Option<OfflineCache<S, N>>,
  state: Option<WorkerState>,
}

impl<S, N> Registration<S, N>
where
  S: CacheStorage + 'static,
  N: Network,
{
  /// Registration with no worker yet.
  pub fn new(network: Arc<N>) -> Self {
    Self {
      network,
      active: None,
      state: None,
    }
  }

  /// Registration whose worker was installed earlier.
  pub fn activated(network: Arc<N>, cache: OfflineCache<S, N>) -> Self {
    Self {
      network,
      active: Some(cache),
      state: Some(WorkerState::Activated),
    }
  }

  pub fn state(&self) -> Option<WorkerState> {
    self.state
  }

  pub fn is_controlled(&self) -> bool {
    self.active.is_some()
  }

  /// Install `candidate` and activate it on success.
  ///
  /// On failure the candidate becomes redundant and the previously active
  /// worker, if any, keeps serving.
  pub async fn register(
    &mut self,
    candidate: OfflineCache<S, N>,
    manifest: &[RequestKey],
  ) -> Result<usize> {
    self.state = Some(WorkerState::Installing);

    match candidate.install(manifest).await {
      Ok(count) => {
        self.active = Some(candidate);
        self.state = Some(WorkerState::Activated);
        info!(entries = count, "Worker activated");
        Ok(count)
      }
      Err(e) => {
        self.state = Some(WorkerState::Redundant);
        if self.active.is_some() {
          warn!(error = %e, "Install failed; previous worker stays active");
        } else {
          error!(error = %e, "Install failed; requests stay uncontrolled");
        }
        Err(e)
      }
    }
  }

  /// Resolve a request through the active worker, or the bare network.
  pub async fn handle(&self, request: &Request) -> Option<Resolution> {
    if let Some(cache) = &self.active {
      return cache.handle(request).await;
    }

    match self.network.fetch(request).await {
      Ok(response) => Some(Resolution::from_network(response.into_snapshot(), false)),
      Err(e) => {
        error!(key = %request.key, error = %e, "Uncontrolled fetch failed");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource};
  use crate::testing::{key, text, FakeNetwork};

  fn candidate(
    storage: &Arc<MemoryStorage>,
    network: &Arc<FakeNetwork>,
  ) -> OfflineCache<MemoryStorage, FakeNetwork> {
    OfflineCache::from_shared(
      Arc::clone(storage),
      Arc::clone(network),
      key("/index.html"),
    )
  }

  #[tokio::test]
  async fn test_successful_install_activates() {
    let network = Arc::new(FakeNetwork::new().with_route("/index.html", "<html>"));
    let storage = Arc::new(MemoryStorage::new());
    let mut registration = Registration::new(Arc::clone(&network));
    assert!(!registration.is_controlled());

    let count = registration
      .register(candidate(&storage, &network), &[key("/index.html")])
      .await
      .unwrap();

    assert_eq!(count, 1);
    assert_eq!(registration.state(), Some(WorkerState::Activated));
    assert!(registration.is_controlled());
  }

  #[tokio::test]
  async fn test_failed_install_is_redundant_and_uncontrolled() {
    let network = Arc::new(FakeNetwork::new().with_route("/style.css", "body{}"));
    let storage = Arc::new(MemoryStorage::new());
    let mut registration = Registration::new(Arc::clone(&network));

    let result = registration
      .register(
        candidate(&storage, &network),
        &[key("/index.html"), key("/style.css")],
      )
      .await;

    assert!(result.is_err());
    assert_eq!(registration.state(), Some(WorkerState::Redundant));
    assert!(!registration.is_controlled());
    assert_eq!(storage.len(), 0);

    // Uncontrolled requests hit the network and are not stored
    let resolution = registration
      .handle(&Request::new(key("/style.css")))
      .await
      .unwrap();
    assert_eq!(resolution.source, ResponseSource::NetworkUncached);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(storage.len(), 0);
  }

  #[tokio::test]
  async fn test_failed_update_keeps_previous_worker() {
    let network = Arc::new(FakeNetwork::new().with_route("/index.html", "<html>"));
    let storage = Arc::new(MemoryStorage::new());
    let mut registration = Registration::new(Arc::clone(&network));
    registration
      .register(candidate(&storage, &network), &[key("/index.html")])
      .await
      .unwrap();

    let update = registration
      .register(
        candidate(&storage, &network),
        &[key("/index.html"), key("/new-asset.js")],
      )
      .await;
    assert!(update.is_err());
    assert_eq!(registration.state(), Some(WorkerState::Redundant));
    assert!(registration.is_controlled());

    network.set_online(false);
    let resolution = registration
      .handle(&Request::new(key("/index.html")))
      .await
      .unwrap();
    assert_eq!(resolution.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_uncontrolled_offline_is_unresolved() {
    let network = Arc::new(FakeNetwork::new());
    network.set_online(false);
    let registration: Registration<MemoryStorage, FakeNetwork> =
      Registration::new(Arc::clone(&network));

    assert!(registration
      .handle(&Request::new(key("/index.html")))
      .await
      .is_none());
  }

  #[tokio::test]
  async fn test_previously_installed_worker_serves_cache() {
    let network = Arc::new(FakeNetwork::new());
    let storage = Arc::new(MemoryStorage::new());
    storage.put(&key("/style.css"), &text("body{}")).unwrap();
    let registration = Registration::activated(
      Arc::clone(&network),
      candidate(&storage, &network),
    );

    let resolution = registration
      .handle(&Request::new(key("/style.css")))
      .await
      .unwrap();
    assert_eq!(resolution.source, ResponseSource::Cache);
    assert_eq!(network.calls(), 0);
  }
}
