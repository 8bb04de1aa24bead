/// Schema for cache namespaces, cache entries, the pending mutation queue and
/// worker registrations.
pub const SCHEMA: &str = r#"
-- Named cache namespaces; id preserves creation order for cross-namespace lookups
CREATE TABLE IF NOT EXISTS cache_namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Request identity -> response snapshot
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_hash ON cache_entries(request_hash);

-- Writes made while offline, awaiting replay
CREATE TABLE IF NOT EXISTS pending_mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    target TEXT NOT NULL,
    content_type TEXT,
    payload BLOB NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Worker version occupying each registration slot ('active', 'waiting')
CREATE TABLE IF NOT EXISTS worker_registrations (
    slot TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    static_name TEXT NOT NULL,
    dynamic_name TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
