//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::{CachedEntry, RequestKey, ResponseSnapshot};

/// Trait for cache storage backends.
///
/// One storage handle represents one named cache. Writes for an existing
/// key replace the previous entry.
pub trait CacheStorage: Send + Sync {
  /// Look up a stored entry. `Ok(None)` is a miss.
  fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Store a single entry.
  fn put(&self, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()>;

  /// Store every entry or none of them.
  fn put_all(&self, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()>;

  /// All stored request identities, ordered by URL.
  fn keys(&self) -> Result<Vec<RequestKey>>;
}

fn ensure_storable(key: &RequestKey) -> Result<()> {
  if key.is_storable() {
    Ok(())
  } else {
    Err(eyre!("Refusing to store {}: only GET requests are cacheable", key))
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  cache_name: String,
}

impl SqliteStorage {
  /// Open the named cache in the database at `path`, creating both if needed.
  pub fn open(path: &Path, cache_name: &str) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn, cache_name)
  }

  /// Open a throwaway in-memory database.
  #[cfg(test)]
  pub fn open_in_memory(cache_name: &str) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn, cache_name)
  }

  fn with_connection(conn: Connection, cache_name: &str) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
      cache_name: cache_name.to_string(),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pulse-cache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Response snapshots, one row per (cache, request identity)
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url
    ON cache_entries(cache_name, url);
"#;

const UPSERT_ENTRY: &str =
  "INSERT OR REPLACE INTO cache_entries (cache_name, key_hash, method, url, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))";

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND key_hash = ?",
        params![self.cache_name, key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to decode headers for {}: {}", key, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntry {
          snapshot: ResponseSnapshot::new(status, headers, body),
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    ensure_storable(key)?;

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let headers = serde_json::to_string(&snapshot.headers)
      .map_err(|e| eyre!("Failed to encode headers: {}", e))?;

    conn
      .execute(
        UPSERT_ENTRY,
        params![
          self.cache_name,
          key.digest(),
          key.method,
          key.url.as_str(),
          snapshot.status,
          headers,
          snapshot.body
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    Ok(())
  }

  fn put_all(&self, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    for (key, _) in entries {
      ensure_storable(key)?;
    }

    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Dropping the transaction without commit rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, snapshot) in entries {
      let headers = serde_json::to_string(&snapshot.headers)
        .map_err(|e| eyre!("Failed to encode headers: {}", e))?;

      tx.execute(
        UPSERT_ENTRY,
        params![
          self.cache_name,
          key.digest(),
          key.method,
          key.url.as_str(),
          snapshot.status,
          headers,
          snapshot.body
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<RequestKey>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE cache_name = ? ORDER BY url, method")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map(params![self.cache_name], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to list cache entries: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url)| {
        let url = url::Url::parse(&url).map_err(|e| eyre!("Corrupt cached URL '{}': {}", url, e))?;
        Ok(RequestKey::new(&method, url))
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Storage kept entirely in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<RequestKey, CachedEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn put(&self, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    ensure_storable(key)?;
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(
      key.clone(),
      CachedEntry {
        snapshot: snapshot.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn put_all(&self, new_entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    for (key, _) in new_entries {
      ensure_storable(key)?;
    }

    // Validated up front, so the insert loop below cannot fail halfway
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let now = Utc::now();
    for (key, snapshot) in new_entries {
      entries.insert(
        key.clone(),
        CachedEntry {
          snapshot: snapshot.clone(),
          cached_at: now,
        },
      );
    }
    Ok(())
  }

  fn keys(&self) -> Result<Vec<RequestKey>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut keys: Vec<RequestKey> = entries.keys().cloned().collect();
    keys.sort_by(|a, b| {
      a.url
        .as_str()
        .cmp(b.url.as_str())
        .then_with(|| a.method.cmp(&b.method))
    });
    Ok(keys)
  }
}
