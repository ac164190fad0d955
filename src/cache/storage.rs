//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::traits::{CacheEntry, CacheKey, StoredKey};
use crate::db::Database;
use crate::network::Response;

/// Trait for cache storage backends.
///
/// Caches are flat named containers; every write is atomic per key.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named cache if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of every existing cache.
  fn list_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and all of its entries. Returns whether it existed.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Get a single entry.
  fn get(&self, cache: &str, key: &CacheKey) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry, creating the cache if needed.
  fn put(&self, cache: &str, entry: &CacheEntry) -> Result<()>;

  /// Delete a single entry. Returns whether it existed.
  fn delete(&self, cache: &str, key: &CacheKey) -> Result<bool>;

  /// Enumerate entries, oldest first.
  fn keys(&self, cache: &str) -> Result<Vec<StoredKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)",
        params![name, Utc::now().timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let conn = self.db.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_name = ?",
        params![name],
      )
      .and_then(|_| conn.execute("DELETE FROM caches WHERE name = ?", params![name]));

    match result {
      Ok(removed) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(removed > 0)
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to delete cache {}: {}", name, e))
      }
    }
  }

  fn get(&self, cache: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, stored_at FROM cache_entries
         WHERE cache_name = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, i64)> = stmt
      .query_row(params![cache, key.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match row {
      Some((url, status, headers, body, stored_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", url, e))?;
        Ok(Some(CacheEntry {
          key: key.clone(),
          url,
          response: Response {
            status,
            headers,
            body,
          },
          stored_at: from_millis(stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, cache: &str, entry: &CacheEntry) -> Result<()> {
    let conn = self.db.lock()?;
    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)",
        params![cache, Utc::now().timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, entry_key, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          cache,
          entry.key.as_str(),
          entry.url,
          entry.response.status,
          headers,
          entry.response.body,
          entry.stored_at.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", entry.url, e))?;

    Ok(())
  }

  fn delete(&self, cache: &str, key: &CacheKey) -> Result<bool> {
    let conn = self.db.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_name = ? AND entry_key = ?",
        params![cache, key.as_str()],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(removed > 0)
  }

  fn keys(&self, cache: &str) -> Result<Vec<StoredKey>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT entry_key, url, stored_at FROM cache_entries
         WHERE cache_name = ?
         ORDER BY stored_at, rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![cache], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to enumerate cache {}: {}", cache, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    rows
      .into_iter()
      .map(|(key, url, stored_at)| {
        Ok(StoredKey {
          key: CacheKey::from_stored(key),
          url,
          stored_at: from_millis(stored_at)?,
        })
      })
      .collect()
  }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(millis)
    .single()
    .ok_or_else(|| eyre!("Invalid stored timestamp: {}", millis))
}
