//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::net::{Request, Response};

use super::key::RequestKey;

/// A stored response copy.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the copy was written
  pub cached_at: DateTime<Utc>,
}

/// Origin-scoped named stores mapping request identities to response copies.
///
/// Every method is atomic on its own; there is no cross-call transaction.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  fn has(&self, name: &str) -> Result<bool>;

  /// All store names, in creation order.
  fn names(&self) -> Result<Vec<String>>;

  /// Delete a store and everything in it. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Write (or overwrite) the entry for `request` in the named store,
  /// creating the store if needed.
  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()>;

  /// Look up `request` in one named store.
  fn lookup(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Look up `request` across every store, oldest store first.
  fn lookup_any(&self, request: &Request) -> Result<Option<CachedResponse>>;

  fn entry_count(&self, name: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A throwaway database that lives as long as the storage does.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named stores; id order is creation order
CREATE TABLE IF NOT EXISTS caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One response copy per request identity per store
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_id INTEGER NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    vary TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_url TEXT,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_id, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(key_hash);
"#;

const ENTRY_COLUMNS: &str =
  "e.vary, e.status, e.status_text, e.headers, e.body, e.response_url, e.cached_at";

/// Request header values named by the response's `Vary`, as seen at put time.
type VaryValues = Vec<(String, Option<String>)>;

struct EntryRow {
  vary: String,
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  response_url: Option<String>,
  cached_at: String,
}

impl EntryRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      vary: row.get(0)?,
      status: row.get(1)?,
      status_text: row.get(2)?,
      headers: row.get(3)?,
      body: row.get(4)?,
      response_url: row.get(5)?,
      cached_at: row.get(6)?,
    })
  }

  fn matches(&self, request: &Request) -> Result<bool> {
    let vary: VaryValues = serde_json::from_str(&self.vary)
      .map_err(|e| eyre!("Failed to deserialize vary values: {}", e))?;

    Ok(
      vary
        .iter()
        .all(|(name, value)| request.header(name) == value.as_deref()),
    )
  }

  fn into_cached(self) -> Result<CachedResponse> {
    let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;

    Ok(CachedResponse {
      response: Response {
        status: self.status,
        status_text: self.status_text,
        headers,
        body: self.body,
        url: self.response_url,
      },
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

/// First row whose recorded `Vary` values agree with `request`.
fn first_match(rows: Vec<EntryRow>, request: &Request) -> Result<Option<CachedResponse>> {
  for row in rows {
    if row.matches(request)? {
      return row.into_cached().map(Some);
    }
  }
  Ok(None)
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    self
      .conn()?
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self.conn()?;
    let found: Option<i64> = conn
      .query_row("SELECT id FROM caches WHERE name = ?", params![name], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", name, e))?;

    Ok(found.is_some())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_id IN (SELECT id FROM caches WHERE name = ?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
    let key = RequestKey::of(request);
    let vary: VaryValues = response
      .vary()
      .into_iter()
      .map(|header| {
        let value = request.header(&header).map(String::from);
        (header, value)
      })
      .collect();
    let vary =
      serde_json::to_string(&vary).map_err(|e| eyre!("Failed to serialize vary values: {}", e))?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    let cache_id: i64 = tx
      .query_row("SELECT id FROM caches WHERE name = ?", params![name], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to resolve cache {}: {}", name, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_id, key_hash, method, url, vary, status, status_text, headers, body, response_url, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_id,
        key.cache_hash(),
        key.method,
        key.url,
        vary,
        response.status,
        response.status_text,
        headers,
        response.body,
        response.url,
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", key.description(), e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let key = RequestKey::of(request);
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM cache_entries e
         INNER JOIN caches c ON c.id = e.cache_id
         WHERE c.name = ? AND e.key_hash = ?"
      ))
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![name, key.cache_hash()], EntryRow::from_row)
      .map_err(|e| eyre!("Failed to query entry: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    first_match(rows, request)
  }

  fn lookup_any(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let key = RequestKey::of(request);
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM cache_entries e
         INNER JOIN caches c ON c.id = e.cache_id
         WHERE e.key_hash = ?
         ORDER BY c.id"
      ))
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![key.cache_hash()], EntryRow::from_row)
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    first_match(rows, request)
  }

  fn entry_count(&self, name: &str) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries e
         INNER JOIN caches c ON c.id = e.cache_id
         WHERE c.name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of cache {}: {}", name, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn movie(id: u32) -> Request {
    Request::get(&format!("https://tmdb.test/movie/{}", id)).unwrap()
  }

  fn body(id: u32) -> Response {
    Response::new(200, format!("{{\"id\":{}}}", id)).with_header("Content-Type", "application/json")
  }

  #[test]
  fn test_put_then_lookup() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("tmdb-cache-v1", &movie(1), &body(1)).unwrap();

    let cached = storage.lookup("tmdb-cache-v1", &movie(1)).unwrap().unwrap();
    assert_eq!(cached.response, body(1));
    assert!(storage.lookup("tmdb-cache-v1", &movie(2)).unwrap().is_none());
    assert!(storage.lookup("other", &movie(1)).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_same_identity() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("c", &movie(1), &body(1)).unwrap();
    storage
      .put("c", &movie(1), &Response::new(500, "boom"))
      .unwrap();

    let cached = storage.lookup("c", &movie(1)).unwrap().unwrap();
    assert_eq!(cached.response.status, 500);
    assert_eq!(cached.response.body_text(), "boom");
    assert_eq!(storage.entry_count("c").unwrap(), 1);
  }

  #[test]
  fn test_names_in_creation_order_and_delete() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("tmdb-cache-v0").unwrap();
    storage.put("tmdb-cache-v1", &movie(1), &body(1)).unwrap();
    storage.open("tmdb-cache-v0").unwrap();

    assert_eq!(
      storage.names().unwrap(),
      vec!["tmdb-cache-v0", "tmdb-cache-v1"]
    );

    assert!(storage.delete("tmdb-cache-v1").unwrap());
    assert!(!storage.delete("tmdb-cache-v1").unwrap());
    assert!(!storage.has("tmdb-cache-v1").unwrap());
    assert_eq!(storage.entry_count("tmdb-cache-v1").unwrap(), 0);
    assert_eq!(storage.names().unwrap(), vec!["tmdb-cache-v0"]);
  }

  #[test]
  fn test_recreated_store_starts_empty() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("c", &movie(1), &body(1)).unwrap();
    storage.delete("c").unwrap();
    storage.open("c").unwrap();

    assert!(storage.lookup("c", &movie(1)).unwrap().is_none());
  }

  #[test]
  fn test_lookup_any_prefers_oldest_store() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("old", &movie(1), &body(1)).unwrap();
    storage
      .put("new", &movie(1), &Response::new(200, "newer"))
      .unwrap();
    storage.put("new", &movie(2), &body(2)).unwrap();

    let hit = storage.lookup_any(&movie(1)).unwrap().unwrap();
    assert_eq!(hit.response, body(1));
    let hit = storage.lookup_any(&movie(2)).unwrap().unwrap();
    assert_eq!(hit.response, body(2));
    assert!(storage.lookup_any(&movie(3)).unwrap().is_none());
  }

  #[test]
  fn test_vary_headers_must_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let english = movie(1).with_header("Accept-Language", "en-US");
    let response = body(1).with_header("Vary", "Accept-Language");
    storage.put("c", &english, &response).unwrap();

    assert!(storage.lookup("c", &english).unwrap().is_some());
    assert!(storage
      .lookup("c", &movie(1).with_header("accept-language", "en-US"))
      .unwrap()
      .is_some());
    assert!(storage
      .lookup("c", &movie(1).with_header("Accept-Language", "zh-CN"))
      .unwrap()
      .is_none());
    assert!(storage.lookup("c", &movie(1)).unwrap().is_none());
  }

  #[test]
  fn test_reopen_from_disk_keeps_entries() {
    let dir = std::env::temp_dir().join(format!("tmdb-sw-test-{}", std::process::id()));
    let path = dir.join("cache.db");
    let _ = std::fs::remove_file(&path);

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.put("tmdb-cache-v1", &movie(7), &body(7)).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let cached = storage.lookup("tmdb-cache-v1", &movie(7)).unwrap().unwrap();
    assert_eq!(cached.response.body_text(), "{\"id\":7}");

    drop(storage);
    let _ = std::fs::remove_dir_all(&dir);
  }
}
