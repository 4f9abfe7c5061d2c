//! Network access behind a small capability trait so the cache logic can be
//! driven by a fake in tests.

mod client;

use color_eyre::{eyre::eyre, Result};
use std::future::Future;

use crate::cache::{Request, ResponseSnapshot};

pub use client::HttpNetwork;

/// A response that reached us over the network.
#[derive(Debug, Clone)]
pub enum NetworkResponse {
  /// Complete response that can be copied into the store
  Storable(ResponseSnapshot),
  /// Response that can be handed to the caller but not stored
  Uncacheable {
    snapshot: ResponseSnapshot,
    reason: String,
  },
}

impl NetworkResponse {
  pub fn into_snapshot(self) -> ResponseSnapshot {
    match self {
      Self::Storable(snapshot) | Self::Uncacheable { snapshot, .. } => snapshot,
    }
  }
}

/// Anything that can perform a request.
///
/// `Err` means the request was rejected (offline, DNS failure, connection
/// reset). HTTP error statuses are ordinary responses.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<NetworkResponse>> + Send;
}

/// Network that rejects every request.
pub struct OfflineNetwork;

impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<NetworkResponse> {
    Err(eyre!("Network unavailable: {}", request.key))
  }
}
