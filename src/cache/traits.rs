//! Core types for the cache store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::network::{Request, Response};

/// Hashed request identity (method + URL without fragment).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn for_request(request: &Request) -> Self {
    Self::from_identity(&request.identity())
  }

  /// Key for a plain GET of `url`.
  pub fn for_url(url: &Url) -> Self {
    Self::for_request(&Request::get(url.clone()))
  }

  fn from_identity(identity: &str) -> Self {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  /// Rebuild a key read back from storage.
  pub fn from_stored(hash: String) -> Self {
    Self(hash)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub url: String,
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(request: &Request, response: Response, stored_at: DateTime<Utc>) -> Self {
    Self {
      key: CacheKey::for_request(request),
      url: request.url.to_string(),
      response,
      stored_at,
    }
  }
}

/// Key and age of an entry, without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
  pub key: CacheKey,
  pub url: String,
  pub stored_at: DateTime<Utc>,
}

/// A versioned epoch of cache partitions.
///
/// Bumping the version supersedes every partition of the previous generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheGeneration {
  pub name: String,
  pub version: String,
}

impl CacheGeneration {
  pub fn new(name: &str, version: &str) -> Self {
    Self {
      name: name.to_string(),
      version: version.to_string(),
    }
  }

  pub fn id(&self) -> String {
    format!("{}-v{}", self.name, self.version)
  }

  /// Storage name of `partition` within this generation.
  pub fn cache_name(&self, partition: &str) -> String {
    format!("{}-{}", self.id(), partition)
  }

  /// Whether a cache name was created by this application, in any generation.
  pub fn is_app_cache(&self, cache_name: &str) -> bool {
    cache_name.starts_with(&format!("{}-", self.name))
  }
}

impl fmt::Display for CacheGeneration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.id())
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// A synthesized answer from the fallback provider.
  pub fn fallback(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      cached_at: None,
    }
  }

  /// A write captured for later replay.
  pub fn queued(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Queued,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache while a background revalidation is in flight
  CacheStale,
  /// Network failed or timed out, serving cached data
  Offline,
  /// Neither cache nor network could answer
  Fallback,
  /// State-changing request deferred until connectivity returns
  Queued,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::CacheFresh => "cache",
      Self::CacheStale => "cache (revalidating)",
      Self::Offline => "cache (offline)",
      Self::Fallback => "fallback",
      Self::Queued => "queued",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_is_stable_hex() {
    let request = Request::parse("https://app.test/login").unwrap();
    let key = CacheKey::for_request(&request);
    assert_eq!(key.as_str().len(), 64);
    assert_eq!(key, CacheKey::for_url(&request.url));
  }

  #[test]
  fn test_generation_names() {
    let generation = CacheGeneration::new("school-ms", "1.4.0");
    assert_eq!(generation.id(), "school-ms-v1.4.0");
    assert_eq!(generation.cache_name("pages"), "school-ms-v1.4.0-pages");
    assert!(generation.is_app_cache("school-ms-v1.3.0-images"));
    assert!(!generation.is_app_cache("other-app-v1-pages"));
  }
}
