//! Queue storage trait and SQLite implementation.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use url::Url;

use crate::db::Database;
use crate::network::Request;

/// A state-changing request captured while offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWrite {
  pub id: i64,
  pub tag: String,
  pub method: String,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
}

impl QueuedWrite {
  /// Rebuild the original request for replay.
  pub fn to_request(&self) -> Result<Request> {
    let url = Url::parse(&self.url).map_err(|e| eyre!("Queued write has invalid URL: {}", e))?;
    Ok(Request {
      method: self.method.clone(),
      url,
      destination: Default::default(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    })
  }
}

/// Persistent store of queued writes. Entries are only ever appended,
/// removed on delivery, or have their retry count bumped.
pub trait QueueStorage: Send + Sync + 'static {
  /// Append a request; returns its id.
  fn push(&self, tag: &str, request: &Request, enqueued_at: DateTime<Utc>) -> Result<i64>;

  /// Writes queued under `tag`, in enqueue order.
  fn pending(&self, tag: &str) -> Result<Vec<QueuedWrite>>;

  /// Every queued write, in enqueue order.
  fn all(&self) -> Result<Vec<QueuedWrite>>;

  fn remove(&self, id: i64) -> Result<()>;

  /// Increment the retry count; returns the new count.
  fn mark_retry(&self, id: i64) -> Result<u32>;
}

/// SQLite-based queue storage, sharing the cache database.
pub struct SqliteQueue {
  db: Database,
}

impl SqliteQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  fn select(&self, tag: Option<&str>) -> Result<Vec<QueuedWrite>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, tag, method, url, headers, body, enqueued_at, retry_count
         FROM queued_writes
         WHERE ?1 IS NULL OR tag = ?1
         ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![tag], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
          row.get::<_, Option<Vec<u8>>>(5)?,
          row.get::<_, i64>(6)?,
          row.get::<_, u32>(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query queued writes: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read queued write: {}", e))?;

    rows
      .into_iter()
      .map(
        |(id, tag, method, url, headers, body, enqueued_at, retry_count)| {
          let headers = serde_json::from_str(&headers)
            .map_err(|e| eyre!("Failed to deserialize headers of write {}: {}", id, e))?;
          let enqueued_at = Utc
            .timestamp_millis_opt(enqueued_at)
            .single()
            .ok_or_else(|| eyre!("Invalid enqueue time on write {}", id))?;
          Ok(QueuedWrite {
            id,
            tag,
            method,
            url,
            headers,
            body,
            enqueued_at,
            retry_count,
          })
        },
      )
      .collect()
  }
}

impl QueueStorage for SqliteQueue {
  fn push(&self, tag: &str, request: &Request, enqueued_at: DateTime<Utc>) -> Result<i64> {
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT INTO queued_writes (tag, method, url, headers, body, enqueued_at, retry_count)
         VALUES (?, ?, ?, ?, ?, ?, 0)",
        params![
          tag,
          request.method,
          request.url.as_str(),
          headers,
          request.body,
          enqueued_at.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue write: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn pending(&self, tag: &str) -> Result<Vec<QueuedWrite>> {
    self.select(Some(tag))
  }

  fn all(&self) -> Result<Vec<QueuedWrite>> {
    self.select(None)
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute("DELETE FROM queued_writes WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued write {}: {}", id, e))?;
    Ok(())
  }

  fn mark_retry(&self, id: i64) -> Result<u32> {
    let conn = self.db.lock()?;
    conn
      .query_row(
        "UPDATE queued_writes SET retry_count = retry_count + 1 WHERE id = ?
         RETURNING retry_count",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to update queued write {}: {}", id, e))
  }
}
