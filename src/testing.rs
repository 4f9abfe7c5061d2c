//! Fakes shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use crate::cache::{
  CacheStorage, CachedEntry, MemoryStorage, Request, RequestKey, ResponseSnapshot,
};
use crate::net::{Network, NetworkResponse};

/// `GET` identity for a path on the test origin.
pub fn key(path: &str) -> RequestKey {
  let origin = Url::parse("http://localhost:8080").unwrap();
  RequestKey::resolve(&origin, path).unwrap()
}

/// 200 response with a plain text body.
pub fn text(body: &str) -> ResponseSnapshot {
  ResponseSnapshot::new(
    200,
    vec![("content-type".to_string(), "text/plain".to_string())],
    body.as_bytes().to_vec(),
  )
}

/// Poll until a background write for `key` lands.
pub async fn wait_for_entry(storage: &impl CacheStorage, key: &RequestKey) -> CachedEntry {
  for _ in 0..100 {
    if let Some(entry) = storage.get(key).unwrap() {
      return entry;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("entry for {} was never stored", key);
}

/// Scripted network. Unknown URLs answer 404.
pub struct FakeNetwork {
  routes: HashMap<RequestKey, NetworkResponse>,
  online: AtomicBool,
  calls: AtomicUsize,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      routes: HashMap::new(),
      online: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
    }
  }

  pub fn with_route(mut self, path: &str, body: &str) -> Self {
    self
      .routes
      .insert(key(path), NetworkResponse::Storable(text(body)));
    self
  }

  pub fn with_uncacheable_route(mut self, path: &str, body: &str) -> Self {
    self.routes.insert(
      key(path),
      NetworkResponse::Uncacheable {
        snapshot: text(body),
        reason: "too large".to_string(),
      },
    );
    self
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Number of fetches attempted, including rejected ones.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<NetworkResponse> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    if !self.online.load(Ordering::SeqCst) {
      return Err(eyre!("offline"));
    }

    Ok(
      self
        .routes
        .get(&request.key)
        .cloned()
        .unwrap_or_else(|| {
          NetworkResponse::Storable(ResponseSnapshot::new(404, Vec::new(), b"not found".to_vec()))
        }),
    )
  }
}

/// Storage that fails lookups for one key, or every write.
pub struct FailingStorage {
  inner: MemoryStorage,
  broken_key: Option<RequestKey>,
  fail_writes: bool,
}

impl FailingStorage {
  pub fn new(broken_key: RequestKey) -> Self {
    Self {
      inner: MemoryStorage::new(),
      broken_key: Some(broken_key),
      fail_writes: false,
    }
  }

  pub fn failing_writes() -> Self {
    Self {
      inner: MemoryStorage::new(),
      broken_key: None,
      fail_writes: true,
    }
  }

  pub fn inner(&self) -> &MemoryStorage {
    &self.inner
  }
}

impl CacheStorage for FailingStorage {
  fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    if self.broken_key.as_ref() == Some(key) {
      return Err(eyre!("database disk image is malformed"));
    }
    self.inner.get(key)
  }

  fn put(&self, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    if self.fail_writes {
      return Err(eyre!("quota exceeded"));
    }
    self.inner.put(key, snapshot)
  }

  fn put_all(&self, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    if self.fail_writes {
      return Err(eyre!("quota exceeded"));
    }
    self.inner.put_all(entries)
  }

  fn keys(&self) -> Result<Vec<RequestKey>> {
    self.inner.keys()
  }
}
