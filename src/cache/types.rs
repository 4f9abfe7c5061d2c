//! Core types for the caching system: request identities, response snapshots
//! and resolutions.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Identity of a cacheable request: method plus absolute URL.
///
/// Headers never take part in matching. The URL fragment is dropped on
/// construction so `/index.html#top` and `/index.html` share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: Url,
}

impl RequestKey {
  pub fn new(method: &str, mut url: Url) -> Self {
    url.set_fragment(None);
    Self {
      method: method.trim().to_ascii_uppercase(),
      url,
    }
  }

  /// Shorthand for a `GET` identity.
  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  /// Resolve a manifest-style target (`/style.css` or a full URL) against
  /// the page origin into a `GET` identity.
  pub fn resolve(origin: &Url, target: &str) -> Result<Self> {
    let url = origin
      .join(target)
      .map_err(|e| eyre!("Invalid resource '{}': {}", target, e))?;

    match url.scheme() {
      "http" | "https" => Ok(Self::get(url)),
      other => Err(eyre!(
        "Unsupported scheme '{}' for resource '{}'",
        other,
        target
      )),
    }
  }

  /// Only `GET` responses may be written to the store.
  pub fn is_storable(&self) -> bool {
    self.method == "GET"
  }

  /// Stable, fixed-length storage key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// An intercepted resource request.
#[derive(Debug, Clone)]
pub struct Request {
  pub key: RequestKey,
  /// Forwarded to the network; ignored for cache matching
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn new(key: RequestKey) -> Self {
    Self {
      key,
      headers: Vec::new(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }
}

/// Stored status, headers and body for a request identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A snapshot as read back from storage.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub snapshot: ResponseSnapshot,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// A resolved request, including where the response came from.
#[derive(Debug, Clone)]
pub struct Resolution {
  pub response: ResponseSnapshot,
  pub source: ResponseSource,
  /// When the served entry was cached (cache and fallback sources only)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Resolution {
  pub fn from_cache(entry: CachedEntry) -> Self {
    Self {
      response: entry.snapshot,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  pub fn from_network(response: ResponseSnapshot, stored: bool) -> Self {
    Self {
      response,
      source: if stored {
        ResponseSource::Network
      } else {
        ResponseSource::NetworkUncached
      },
      cached_at: None,
    }
  }

  pub fn fallback(entry: CachedEntry) -> Self {
    Self {
      response: entry.snapshot,
      source: ResponseSource::Fallback,
      cached_at: Some(entry.cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Stored entry for the request itself
  Cache,
  /// Network response, queued for storage
  Network,
  /// Network response that was not stored
  NetworkUncached,
  /// Stored fallback page, served because lookup or network failed
  Fallback,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Cache => "cache",
      Self::Network => "network",
      Self::NetworkUncached => "network (not cached)",
      Self::Fallback => "fallback",
    };
    f.write_str(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("http://localhost:8080").unwrap()
  }

  #[test]
  fn test_resolve_relative_path() {
    let key = RequestKey::resolve(&origin(), "/style.css").unwrap();
    assert_eq!(key.method, "GET");
    assert_eq!(key.url.as_str(), "http://localhost:8080/style.css");
  }

  #[test]
  fn test_resolve_absolute_url_ignores_origin() {
    let key = RequestKey::resolve(&origin(), "https://s3.tradingview.com/tv.js").unwrap();
    assert_eq!(key.url.as_str(), "https://s3.tradingview.com/tv.js");
  }

  #[test]
  fn test_resolve_rejects_non_http_scheme() {
    assert!(RequestKey::resolve(&origin(), "data:text/plain,hi").is_err());
  }

  #[test]
  fn test_fragment_is_not_part_of_identity() {
    let a = RequestKey::resolve(&origin(), "/index.html#prices").unwrap();
    let b = RequestKey::resolve(&origin(), "/index.html").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.digest(), b.digest());
  }

  #[test]
  fn test_digest_depends_on_method() {
    let url = Url::parse("http://localhost:8080/api").unwrap();
    let get = RequestKey::get(url.clone());
    let post = RequestKey::new("post", url);
    assert_eq!(post.method, "POST");
    assert_ne!(get.digest(), post.digest());
    assert!(get.is_storable());
    assert!(!post.is_storable());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let snapshot = ResponseSnapshot::new(
      200,
      vec![("Content-Type".to_string(), "text/css".to_string())],
      Vec::new(),
    );
    assert_eq!(snapshot.header("content-type"), Some("text/css"));
    assert_eq!(snapshot.header("etag"), None);
    assert!(snapshot.is_ok());
  }
}
