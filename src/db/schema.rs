/// Schema for the cache store and the deferred write queue.
pub const SCHEMA: &str = r#"
-- Named caches; a generation owns one cache per partition
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

-- Cached responses, keyed by hashed request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (cache_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_age
    ON cache_entries(cache_name, stored_at);

-- State-changing requests waiting for replay; id order is enqueue order
CREATE TABLE IF NOT EXISTS queued_writes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_queued_writes_tag ON queued_writes(tag, id);
"#;
