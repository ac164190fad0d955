//! Persistent, generation-scoped response cache.
//!
//! This module provides:
//! - A storage trait over named caches with put/get/delete/enumerate
//! - A SQLite implementation
//! - Partition handles that enforce entry-count and max-age limits on write

mod partition;
mod storage;
mod traits;

pub use partition::{Partition, PartitionLimits};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheGeneration, CacheKey, CacheResult, CacheSource, StoredKey};
