//! Partition handle: one named cache of the current generation plus its limits.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheKey, StoredKey};
use crate::network::{Request, Response};

/// Size and age limits of a partition. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLimits {
  pub max_entries: Option<usize>,
  pub max_age_seconds: Option<u64>,
}

impl PartitionLimits {
  fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match self.max_age_seconds {
      Some(max_age) => now - stored_at > Duration::seconds(max_age as i64),
      None => false,
    }
  }
}

/// A named partition of the cache store.
///
/// Limits are enforced lazily: reads drop expired entries, writes evict
/// expired and overflowing entries before inserting.
pub struct Partition<S: CacheStorage> {
  storage: Arc<S>,
  /// Storage-level cache name (generation-qualified)
  name: String,
  limits: PartitionLimits,
}

impl<S: CacheStorage> Partition<S> {
  pub fn new(storage: Arc<S>, name: String, limits: PartitionLimits) -> Self {
    Self {
      storage,
      name,
      limits,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Look up the entry for `request`, treating expired entries as misses.
  pub fn get(&self, request: &Request) -> Result<Option<CacheEntry>> {
    self.get_key(&CacheKey::for_request(request))
  }

  /// Look up a plain GET of `url`.
  pub fn match_url(&self, url: &Url) -> Result<Option<CacheEntry>> {
    self.get_key(&CacheKey::for_url(url))
  }

  fn get_key(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
    match self.storage.get(&self.name, key)? {
      Some(entry) if self.limits.is_expired(entry.stored_at, Utc::now()) => {
        debug!(cache = %self.name, url = %entry.url, "Dropping expired entry");
        self.storage.delete(&self.name, key)?;
        Ok(None)
      }
      other => Ok(other),
    }
  }

  /// Store `response` for `request`, evicting to stay within limits.
  pub fn put(&self, request: &Request, response: Response) -> Result<()> {
    self.put_entry(CacheEntry::new(request, response, Utc::now()))
  }

  /// Store a prepared entry, evicting to stay within limits.
  pub fn put_entry(&self, entry: CacheEntry) -> Result<()> {
    self.evict_for_insert(&entry.key, Utc::now())?;
    self.storage.put(&self.name, &entry)
  }

  /// Remove expired entries, then the oldest entries until one more fits.
  fn evict_for_insert(&self, incoming: &CacheKey, now: DateTime<Utc>) -> Result<()> {
    let mut live: Vec<StoredKey> = Vec::new();
    for stored in self.storage.keys(&self.name)? {
      if self.limits.is_expired(stored.stored_at, now) {
        debug!(cache = %self.name, url = %stored.url, "Evicting expired entry");
        self.storage.delete(&self.name, &stored.key)?;
      } else if &stored.key != incoming {
        live.push(stored);
      }
    }

    if let Some(max_entries) = self.limits.max_entries {
      // `live` is oldest first and excludes the key being replaced
      let overflow = (live.len() + 1).saturating_sub(max_entries);
      for stored in live.iter().take(overflow) {
        debug!(cache = %self.name, url = %stored.url, "Evicting oldest entry");
        self.storage.delete(&self.name, &stored.key)?;
      }
    }

    Ok(())
  }

  /// Entries currently stored, oldest first.
  pub fn keys(&self) -> Result<Vec<StoredKey>> {
    self.storage.keys(&self.name)
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.keys()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

impl<S: CacheStorage> Clone for Partition<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      name: self.name.clone(),
      limits: self.limits,
    }
  }
}
