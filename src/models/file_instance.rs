//! Physical blobs and their fixity state.

use super::{opt_ts_col, to_ts, ts_col, uuid_col};
use crate::errors::{Error, Result};
use crate::storage::BlobInfo;
use crate::types::Checksum;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// A physical blob. Write-only until the first successful `save`, then
/// read-only and immutable; the checksum is set exactly once on that
/// transition.
#[derive(Debug, Clone)]
pub struct FileInstance {
    pub id: Uuid,
    pub uri: Option<String>,
    pub storage_backend: Option<String>,
    pub storage_class: Option<String>,
    pub size: u64,
    pub checksum: Option<Checksum>,
    pub readable: bool,
    pub writable: bool,
    /// When the last fixity check ran.
    pub last_check_at: Option<DateTime<Utc>>,
    /// `Some(true)` = matched, `Some(false)` = mismatch, `None` = the check
    /// aborted (e.g. blob missing).
    pub last_check: Option<bool>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl FileInstance {
    const COLUMNS: &'static str = "id, uri, storage_backend, storage_class, size, checksum, \
         readable, writable, last_check_at, last_check, created, updated";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let checksum: Option<String> = row.get(5)?;
        Ok(Self {
            id: uuid_col(row, 0)?,
            uri: row.get(1)?,
            storage_backend: row.get(2)?,
            storage_class: row.get(3)?,
            size: row.get::<_, i64>(4)? as u64,
            checksum: checksum.and_then(|c| Checksum::parse(&c)),
            readable: row.get(6)?,
            writable: row.get(7)?,
            last_check_at: opt_ts_col(row, 8)?,
            last_check: row.get(9)?,
            created: ts_col(row, 10)?,
            updated: ts_col(row, 11)?,
        })
    }

    /// In-memory row for a brand-new writable file (not yet persisted).
    pub fn fresh(storage_class: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            uri: None,
            storage_backend: None,
            storage_class: storage_class.map(str::to_string),
            size: 0,
            checksum: None,
            readable: false,
            writable: true,
            last_check_at: None,
            last_check: None,
            created: now,
            updated: now,
        }
    }

    /// Persist a fresh row (including any backend/URI the factory stamped).
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO file_instances
             (id, uri, storage_backend, storage_class, size, checksum, readable, writable,
              last_check_at, last_check, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9, ?9)",
            params![
                self.id.to_string(),
                self.uri,
                self.storage_backend,
                self.storage_class,
                self.size as i64,
                self.checksum.as_ref().map(Checksum::as_str),
                self.readable,
                self.writable,
                to_ts(&self.created),
            ],
        )?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: &Uuid) -> Result<Option<FileInstance>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM file_instances WHERE id = ?1", Self::COLUMNS),
                params![id.to_string()],
                Self::from_row,
            )
            .optional()?)
    }

    /// Stamp the result of a successful `save`: the write-only → read-only
    /// transition. Refused when the row is already read-only.
    pub fn finalize(conn: &Connection, id: &Uuid, info: &BlobInfo) -> Result<()> {
        let checksum = info
            .checksum
            .as_ref()
            .ok_or_else(|| Error::Database("save result missing checksum".to_string()))?;
        let changed = conn.execute(
            "UPDATE file_instances
             SET uri = ?1, size = ?2, checksum = ?3, readable = 1, writable = 0, updated = ?4
             WHERE id = ?5 AND writable = 1",
            params![
                info.uri,
                info.size as i64,
                checksum.as_str(),
                to_ts(&Utc::now()),
                id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(Error::FileInstanceAlreadySet);
        }
        Ok(())
    }

    /// Record a fixity check outcome with optimistic locking on `updated`:
    /// returns `false` (and writes nothing) when the row changed under us.
    pub fn record_fixity(
        conn: &Connection,
        id: &Uuid,
        loaded_updated: &DateTime<Utc>,
        last_check: Option<bool>,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE file_instances
             SET last_check = ?1, last_check_at = ?2, updated = ?3
             WHERE id = ?4 AND updated = ?5",
            params![
                last_check,
                to_ts(&Utc::now()),
                to_ts(&Utc::now()),
                id.to_string(),
                to_ts(loaded_updated)
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete the row. Requires `writable = true` unless `force` is set;
    /// fails while object versions or multipart uploads still reference it
    /// (FK RESTRICT).
    pub fn delete_row(conn: &Connection, id: &Uuid, force: bool) -> Result<bool> {
        let file = match Self::get(conn, id)? {
            Some(f) => f,
            None => return Ok(false),
        };
        if !file.writable && !force {
            return Err(Error::InvalidOperation(
                "Cannot delete a read-only FileInstance without force.".to_string(),
            ));
        }
        let changed = conn.execute(
            "DELETE FROM file_instances WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Files with no object version and no multipart upload referencing
    /// them — the dangling leftovers of interrupted uploads and removals.
    pub fn orphans(conn: &Connection, limit: u64) -> Result<Vec<FileInstance>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_instances f
             WHERE NOT EXISTS (SELECT 1 FROM object_versions v WHERE v.file_id = f.id)
               AND NOT EXISTS (SELECT 1 FROM multipart_objects m WHERE m.file_id = f.id)
             ORDER BY f.created
             LIMIT ?1",
            Self::COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Readable files due for a fixity re-check, oldest check first (files
    /// never checked sort before everything else).
    pub fn due_for_check(
        conn: &Connection,
        checked_before: &DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<FileInstance>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_instances
             WHERE readable = 1
               AND (last_check_at IS NULL OR last_check_at < ?1)
             ORDER BY last_check_at IS NOT NULL, last_check_at
             LIMIT ?2",
            Self::COLUMNS
        ))?;
        let rows = stmt.query_map(params![to_ts(checked_before), limit as i64], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn count_readable(conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM file_instances WHERE readable = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn saved_info(uri: &str, size: u64) -> BlobInfo {
        BlobInfo {
            uri: uri.to_string(),
            size,
            checksum: Some(Checksum::new("md5", "00ff")),
            readable: true,
            writable: false,
        }
    }

    #[test]
    fn test_lifecycle_write_only_to_read_only() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            let file = FileInstance::fresh(Some("S"));
            file.insert(conn)?;

            FileInstance::finalize(conn, &file.id, &saved_info("/data/x", 6))?;
            let loaded = FileInstance::get(conn, &file.id)?.unwrap();
            assert!(loaded.readable);
            assert!(!loaded.writable);
            assert_eq!(loaded.size, 6);
            assert_eq!(loaded.checksum.unwrap().as_str(), "md5:00ff");

            // Second finalize must be refused: content is immutable.
            assert!(FileInstance::finalize(conn, &file.id, &saved_info("/data/y", 7)).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_uri_uniqueness_enforced() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            let a = FileInstance::fresh(None);
            a.insert(conn)?;
            FileInstance::finalize(conn, &a.id, &saved_info("/data/same", 1))?;

            let b = FileInstance::fresh(None);
            b.insert(conn)?;
            assert!(FileInstance::finalize(conn, &b.id, &saved_info("/data/same", 1)).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_requires_writable_or_force() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            let file = FileInstance::fresh(None);
            file.insert(conn)?;
            FileInstance::finalize(conn, &file.id, &saved_info("/data/z", 1))?;

            assert!(FileInstance::delete_row(conn, &file.id, false).is_err());
            assert!(FileInstance::delete_row(conn, &file.id, true)?);
            // Already gone: reports false.
            assert!(!FileInstance::delete_row(conn, &file.id, true)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_record_fixity_optimistic_lock() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            let file = FileInstance::fresh(None);
            file.insert(conn)?;
            FileInstance::finalize(conn, &file.id, &saved_info("/data/f", 1))?;
            let loaded = FileInstance::get(conn, &file.id)?.unwrap();

            assert!(FileInstance::record_fixity(conn, &file.id, &loaded.updated, Some(true))?);
            let after = FileInstance::get(conn, &file.id)?.unwrap();
            assert_eq!(after.last_check, Some(true));
            assert!(after.last_check_at.is_some());

            // Stale `updated` no longer matches: write is refused.
            assert!(!FileInstance::record_fixity(conn, &file.id, &loaded.updated, Some(false))?);
            assert_eq!(
                FileInstance::get(conn, &file.id)?.unwrap().last_check,
                Some(true)
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_due_for_check_ordering_and_filter() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            let never_checked = FileInstance::fresh(None);
            never_checked.insert(conn)?;
            FileInstance::finalize(conn, &never_checked.id, &saved_info("/a", 1))?;

            let checked = FileInstance::fresh(None);
            checked.insert(conn)?;
            FileInstance::finalize(conn, &checked.id, &saved_info("/b", 1))?;
            let loaded = FileInstance::get(conn, &checked.id)?.unwrap();
            FileInstance::record_fixity(conn, &checked.id, &loaded.updated, Some(true))?;

            let unreadable = FileInstance::fresh(None);
            unreadable.insert(conn)?;

            let due = FileInstance::due_for_check(conn, &(Utc::now() + chrono::Duration::hours(1)), 10)?;
            assert_eq!(due.len(), 2, "non-readable files are excluded");
            assert_eq!(due[0].id, never_checked.id, "never-checked files first");
            Ok(())
        })
        .unwrap();
    }
}
