//! SQLite metadata catalog handle.
//!
//! rusqlite connections are synchronous, so every catalog access runs on the
//! blocking pool via [`Database::call`]. SQLite's single-writer model gives
//! the per-bucket write ordering the service relies on; transactions are
//! opened and committed inside one `call` closure and never held across an
//! await point.

use crate::errors::{Error, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS locations (
    id              INTEGER PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    uri             TEXT NOT NULL,
    is_default      INTEGER NOT NULL DEFAULT 0,
    storage_backend TEXT NOT NULL,
    created         TEXT NOT NULL,
    updated         TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ix_locations_default
    ON locations (is_default) WHERE is_default = 1;

CREATE TABLE IF NOT EXISTS buckets (
    id                    TEXT PRIMARY KEY,
    default_location      INTEGER NOT NULL REFERENCES locations (id) ON DELETE RESTRICT,
    default_storage_class TEXT NOT NULL,
    size                  INTEGER NOT NULL DEFAULT 0 CHECK (size >= 0),
    quota_size            INTEGER,
    max_file_size         INTEGER,
    locked                INTEGER NOT NULL DEFAULT 0,
    deleted               INTEGER NOT NULL DEFAULT 0,
    created               TEXT NOT NULL,
    updated               TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bucket_tags (
    bucket_id TEXT NOT NULL REFERENCES buckets (id) ON DELETE CASCADE,
    key       TEXT NOT NULL,
    value     TEXT NOT NULL,
    created   TEXT NOT NULL,
    updated   TEXT NOT NULL,
    PRIMARY KEY (bucket_id, key)
);

CREATE TABLE IF NOT EXISTS file_instances (
    id              TEXT PRIMARY KEY,
    uri             TEXT UNIQUE,
    storage_backend TEXT,
    storage_class   TEXT,
    size            INTEGER NOT NULL DEFAULT 0,
    checksum        TEXT,
    readable        INTEGER NOT NULL DEFAULT 0,
    writable        INTEGER NOT NULL DEFAULT 1,
    last_check_at   TEXT,
    last_check      INTEGER,
    created         TEXT NOT NULL,
    updated         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS object_versions (
    bucket_id  TEXT NOT NULL REFERENCES buckets (id) ON DELETE RESTRICT,
    key        TEXT NOT NULL,
    version_id TEXT NOT NULL UNIQUE,
    file_id    TEXT REFERENCES file_instances (id) ON DELETE RESTRICT,
    mimetype   TEXT,
    is_head    INTEGER NOT NULL DEFAULT 1,
    created    TEXT NOT NULL,
    updated    TEXT NOT NULL,
    PRIMARY KEY (bucket_id, key, version_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS ix_object_versions_head
    ON object_versions (bucket_id, key) WHERE is_head = 1;

CREATE INDEX IF NOT EXISTS ix_object_versions_file
    ON object_versions (file_id);

CREATE TABLE IF NOT EXISTS object_version_tags (
    version_id TEXT NOT NULL REFERENCES object_versions (version_id) ON DELETE CASCADE,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    created    TEXT NOT NULL,
    updated    TEXT NOT NULL,
    PRIMARY KEY (version_id, key)
);

CREATE TABLE IF NOT EXISTS multipart_objects (
    upload_id        TEXT PRIMARY KEY,
    bucket_id        TEXT NOT NULL REFERENCES buckets (id) ON DELETE RESTRICT,
    key              TEXT NOT NULL,
    file_id          TEXT NOT NULL REFERENCES file_instances (id) ON DELETE RESTRICT,
    chunk_size       INTEGER NOT NULL,
    size             INTEGER NOT NULL,
    last_part_number INTEGER NOT NULL,
    last_part_size   INTEGER NOT NULL,
    completed        INTEGER NOT NULL DEFAULT 0,
    created          TEXT NOT NULL,
    updated          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_multipart_objects_bucket
    ON multipart_objects (bucket_id, key);

CREATE TABLE IF NOT EXISTS parts (
    upload_id   TEXT NOT NULL REFERENCES multipart_objects (upload_id) ON DELETE CASCADE,
    part_number INTEGER NOT NULL,
    checksum    TEXT,
    start_byte  INTEGER NOT NULL,
    end_byte    INTEGER NOT NULL,
    created     TEXT NOT NULL,
    updated     TEXT NOT NULL,
    PRIMARY KEY (upload_id, part_number)
);
"#;

/// Shared handle to the metadata catalog.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the catalog at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Database(format!("cannot create {parent:?}: {e}")))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Database(format!("catalog task panicked: {e}")))?
    }

    /// Synchronous access for code already on a blocking thread (tests,
    /// startup seeding).
    pub fn with<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock();
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_bootstraps_idempotently() {
        let db = Database::open_in_memory().unwrap();
        // Re-applying the schema must be a no-op.
        db.with(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_head_index_rejects_second_head() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            conn.execute_batch(
                "INSERT INTO locations (name, uri, is_default, storage_backend, created, updated)
                 VALUES ('default', '/tmp/x', 1, 'fs', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');
                 INSERT INTO buckets (id, default_location, default_storage_class, created, updated)
                 VALUES ('b1', 1, 'S', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');
                 INSERT INTO object_versions (bucket_id, key, version_id, is_head, created, updated)
                 VALUES ('b1', 'k', 'v1', 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');",
            )?;
            let second_head = conn.execute(
                "INSERT INTO object_versions (bucket_id, key, version_id, is_head, created, updated)
                 VALUES ('b1', 'k', 'v2', 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            );
            assert!(second_head.is_err(), "partial unique index must reject a second head");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_default_location_index_rejects_second_default() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            conn.execute(
                "INSERT INTO locations (name, uri, is_default, storage_backend, created, updated)
                 VALUES ('one', '/a', 1, 'fs', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            let second = conn.execute(
                "INSERT INTO locations (name, uri, is_default, storage_backend, created, updated)
                 VALUES ('two', '/b', 1, 'fs', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            );
            assert!(second.is_err());
            Ok(())
        })
        .unwrap();
    }
}
