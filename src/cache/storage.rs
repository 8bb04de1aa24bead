//! Cache storage trait with SQLite and in-memory implementations.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::{CachedResponse, RequestKey};
use crate::db::{parse_datetime, Database};
use crate::net::{Response, ResponseType};

/// Trait for cache storage backends.
///
/// Every mutation is atomic per call; there is no cross-call locking.
pub trait CacheStorage: Send + Sync {
  /// Namespace names in creation order.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Delete a namespace and all its entries. Returns whether it existed.
  fn delete(&self, namespace: &str) -> Result<bool>;

  /// Store one entry, creating the namespace if needed. Overwrites.
  fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store a batch of entries all-or-nothing, creating the namespace if needed.
  fn put_all(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up an entry in one namespace.
  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up an entry across all namespaces, oldest namespace first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Keys stored in a namespace.
  fn keys(&self, namespace: &str) -> Result<Vec<RequestKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

const ENTRY_COLUMNS: &str = "e.status, e.headers, e.body, e.response_type, e.cached_at";

fn row_to_cached(row: &Row<'_>) -> rusqlite::Result<(i64, String, Vec<u8>, String, String)> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_cached(
  (status, headers, body, response_type, cached_at): (i64, String, Vec<u8>, String, String),
) -> Result<CachedResponse> {
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
  let response_type = ResponseType::parse(&response_type)
    .ok_or_else(|| eyre!("Unknown cached response type '{}'", response_type))?;
  let status = u16::try_from(status).map_err(|_| eyre!("Invalid cached status {}", status))?;

  Ok(CachedResponse {
    response: Response {
      status,
      headers,
      body,
      response_type,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

fn insert_entry(
  conn: &rusqlite::Connection,
  namespace: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (namespace, request_hash, method, url, status, headers, body, response_type, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        namespace,
        key.cache_hash(),
        key.method(),
        key.url(),
        response.status,
        headers,
        response.body,
        response.response_type.as_str(),
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry {}: {}", key.url(), e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;

    Ok(names)
  }

  fn delete(&self, namespace: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE namespace = ?",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", namespace, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    insert_entry(&tx, namespace, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_all(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // Dropping the transaction on error rolls back every insert
    for (key, response) in entries {
      insert_entry(&tx, namespace, key, response)?;
    }
    if entries.is_empty() {
      tx.execute(
        "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;
    let sql = format!(
      "SELECT {} FROM cache_entries e WHERE e.namespace = ? AND e.request_hash = ?",
      ENTRY_COLUMNS
    );

    let row = conn
      .query_row(&sql, params![namespace, key.cache_hash()], row_to_cached)
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    row.map(decode_cached).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;
    let sql = format!(
      "SELECT {} FROM cache_entries e
       INNER JOIN cache_namespaces n ON n.name = e.namespace
       WHERE e.request_hash = ?
       ORDER BY n.id
       LIMIT 1",
      ENTRY_COLUMNS
    );

    let row = conn
      .query_row(&sql, params![key.cache_hash()], row_to_cached)
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    row.map(decode_cached).transpose()
  }

  fn keys(&self, namespace: &str) -> Result<Vec<RequestKey>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE namespace = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![namespace], |row| {
        Ok(RequestKey::from_parts(row.get(0)?, row.get(1)?))
      })
      .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache key row: {}", e))?;

    Ok(keys)
  }
}

type Namespace = HashMap<String, (RequestKey, CachedResponse)>;

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
  namespaces: Mutex<Vec<(String, Namespace)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<(String, Namespace)>>> {
    self
      .namespaces
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn namespace_mut<'a>(
  namespaces: &'a mut Vec<(String, Namespace)>,
  name: &str,
) -> &'a mut Namespace {
  let index = match namespaces.iter().position(|(n, _)| n == name) {
    Some(index) => index,
    None => {
      namespaces.push((name.to_string(), HashMap::new()));
      namespaces.len() - 1
    }
  };
  &mut namespaces[index].1
}

impl CacheStorage for MemoryStorage {
  fn namespaces(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.iter().map(|(name, _)| name.clone()).collect())
  }

  fn delete(&self, namespace: &str) -> Result<bool> {
    let mut namespaces = self.lock()?;
    let before = namespaces.len();
    namespaces.retain(|(name, _)| name != namespace);
    Ok(namespaces.len() != before)
  }

  fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.put_all(namespace, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut namespaces = self.lock()?;
    let ns = namespace_mut(&mut namespaces, namespace);
    let now = Utc::now();
    for (key, response) in entries {
      ns.insert(
        key.cache_hash(),
        (
          key.clone(),
          CachedResponse {
            response: response.clone(),
            cached_at: now,
          },
        ),
      );
    }
    Ok(())
  }

  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let namespaces = self.lock()?;
    Ok(
      namespaces
        .iter()
        .find(|(name, _)| name == namespace)
        .and_then(|(_, ns)| ns.get(&key.cache_hash()))
        .map(|(_, cached)| cached.clone()),
    )
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let hash = key.cache_hash();
    let namespaces = self.lock()?;
    Ok(
      namespaces
        .iter()
        .find_map(|(_, ns)| ns.get(&hash))
        .map(|(_, cached)| cached.clone()),
    )
  }

  fn keys(&self, namespace: &str) -> Result<Vec<RequestKey>> {
    let namespaces = self.lock()?;
    let mut keys: Vec<RequestKey> = namespaces
      .iter()
      .find(|(name, _)| name == namespace)
      .map(|(_, ns)| ns.values().map(|(key, _)| key.clone()).collect())
      .unwrap_or_default();
    keys.sort_by(|a, b| a.url().cmp(b.url()));
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&Url::parse("http://localhost:1420").unwrap().join(path).unwrap())
  }

  fn backends() -> Vec<(&'static str, Box<dyn CacheStorage>)> {
    let db = Arc::new(Database::open_in_memory().unwrap());
    vec![
      ("sqlite", Box::new(SqliteStorage::new(db)) as Box<dyn CacheStorage>),
      ("memory", Box::new(MemoryStorage::new()) as Box<dyn CacheStorage>),
    ]
  }

  #[test]
  fn test_put_overwrites_same_identity() {
    for (name, storage) in backends() {
      storage.put("dyn", &key("/a"), &Response::new(200, "old")).unwrap();
      storage.put("dyn", &key("/a"), &Response::new(200, "new")).unwrap();

      let cached = storage.get("dyn", &key("/a")).unwrap().unwrap();
      assert_eq!(cached.response.body, b"new", "{}", name);
      assert_eq!(storage.keys("dyn").unwrap().len(), 1, "{}", name);
    }
  }

  #[test]
  fn test_snapshot_preserves_headers_and_type() {
    for (name, storage) in backends() {
      let response = Response::new(200, vec![0u8, 1, 2, 255])
        .with_header("Content-Type", "application/octet-stream")
        .with_type(ResponseType::Cors);
      storage.put("dyn", &key("/blob"), &response).unwrap();

      let cached = storage.get("dyn", &key("/blob")).unwrap().unwrap();
      assert_eq!(cached.response, response, "{}", name);
    }
  }

  #[test]
  fn test_match_any_searches_oldest_namespace_first() {
    for (name, storage) in backends() {
      storage.put("first", &key("/x"), &Response::new(200, "one")).unwrap();
      storage.put("second", &key("/x"), &Response::new(200, "two")).unwrap();
      storage.put("second", &key("/y"), &Response::new(200, "y")).unwrap();

      let hit = storage.match_any(&key("/x")).unwrap().unwrap();
      assert_eq!(hit.response.body, b"one", "{}", name);
      assert!(storage.match_any(&key("/y")).unwrap().is_some(), "{}", name);
      assert!(storage.match_any(&key("/z")).unwrap().is_none(), "{}", name);
    }
  }

  #[test]
  fn test_delete_removes_namespace_and_entries() {
    for (name, storage) in backends() {
      storage.put_all("empty", &[]).unwrap();
      storage.put("doomed", &key("/x"), &Response::new(200, "x")).unwrap();

      assert!(storage.delete("doomed").unwrap(), "{}", name);
      assert!(!storage.delete("doomed").unwrap(), "{}", name);
      assert_eq!(storage.namespaces().unwrap(), vec!["empty".to_string()], "{}", name);
      assert!(storage.match_any(&key("/x")).unwrap().is_none(), "{}", name);
    }
  }

  #[test]
  fn test_put_all_creates_namespace_even_when_empty() {
    for (name, storage) in backends() {
      storage.put_all("static", &[]).unwrap();
      assert_eq!(storage.namespaces().unwrap(), vec!["static".to_string()], "{}", name);
    }
  }
}
