//! Object versions: named pointers into the blob catalog, including delete
//! markers.

use super::{opt_uuid_col, to_ts, ts_col, uuid_col};
use crate::errors::{Error, Result};
use crate::types::Checksum;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// A (bucket, key, version) pointer. `file_id = None` marks a deletion at
/// that point in the key's history.
#[derive(Debug, Clone)]
pub struct ObjectVersion {
    pub bucket_id: Uuid,
    pub key: String,
    pub version_id: Uuid,
    pub file_id: Option<Uuid>,
    pub mimetype: Option<String>,
    pub is_head: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// File columns a listing needs without loading the whole instance.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub size: u64,
    pub checksum: Option<Checksum>,
}

impl ObjectVersion {
    const COLUMNS: &'static str =
        "bucket_id, key, version_id, file_id, mimetype, is_head, created, updated";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            bucket_id: uuid_col(row, 0)?,
            key: row.get(1)?,
            version_id: uuid_col(row, 2)?,
            file_id: opt_uuid_col(row, 3)?,
            mimetype: row.get(4)?,
            is_head: row.get(5)?,
            created: ts_col(row, 6)?,
            updated: ts_col(row, 7)?,
        })
    }

    pub fn is_delete_marker(&self) -> bool {
        self.file_id.is_none()
    }

    /// Insert a new head version, demoting the previous head in the same
    /// transaction. With `file_id = None` this creates a delete marker.
    pub fn create(
        conn: &Connection,
        bucket_id: &Uuid,
        key: &str,
        file_id: Option<&Uuid>,
        mimetype: Option<&str>,
    ) -> Result<ObjectVersion> {
        let now = to_ts(&Utc::now());
        conn.execute(
            "UPDATE object_versions SET is_head = 0, updated = ?1
             WHERE bucket_id = ?2 AND key = ?3 AND is_head = 1",
            params![now, bucket_id.to_string(), key],
        )?;

        let version_id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO object_versions
             (bucket_id, key, version_id, file_id, mimetype, is_head, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![
                bucket_id.to_string(),
                key,
                version_id.to_string(),
                file_id.map(Uuid::to_string),
                mimetype,
                now
            ],
        )?;
        Self::get(conn, bucket_id, key, Some(&version_id), true)?
            .ok_or(Error::NotFound("Object"))
    }

    /// Fetch the head (or a specific version) of (bucket, key). Delete
    /// markers are invisible unless `with_deleted` is set.
    pub fn get(
        conn: &Connection,
        bucket_id: &Uuid,
        key: &str,
        version_id: Option<&Uuid>,
        with_deleted: bool,
    ) -> Result<Option<ObjectVersion>> {
        let mut sql = format!(
            "SELECT {} FROM object_versions WHERE bucket_id = ?1 AND key = ?2",
            Self::COLUMNS
        );
        match version_id {
            Some(_) => sql.push_str(" AND version_id = ?3"),
            None => sql.push_str(" AND is_head = 1"),
        }
        if !with_deleted {
            sql.push_str(" AND file_id IS NOT NULL");
        }

        let result = match version_id {
            Some(vid) => conn
                .query_row(
                    &sql,
                    params![bucket_id.to_string(), key, vid.to_string()],
                    Self::from_row,
                )
                .optional()?,
            None => conn
                .query_row(&sql, params![bucket_id.to_string(), key], Self::from_row)
                .optional()?,
        };
        Ok(result)
    }

    /// List live versions of a bucket (heads only, or every version),
    /// ordered by key and creation time descending. Delete markers are
    /// excluded.
    pub fn get_by_bucket(
        conn: &Connection,
        bucket_id: &Uuid,
        versions: bool,
        limit: Option<u64>,
    ) -> Result<Vec<(ObjectVersion, Option<FileSummary>)>> {
        let mut sql = format!(
            "SELECT {}, f.size, f.checksum
             FROM object_versions v
             LEFT JOIN file_instances f ON f.id = v.file_id
             WHERE v.bucket_id = ?1 AND v.file_id IS NOT NULL",
            Self::COLUMNS
                .split(", ")
                .map(|c| format!("v.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !versions {
            sql.push_str(" AND v.is_head = 1");
        }
        sql.push_str(" ORDER BY v.key, v.created DESC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![bucket_id.to_string()], |row| {
            let version = Self::from_row(row)?;
            let size: Option<i64> = row.get(8)?;
            let checksum: Option<String> = row.get(9)?;
            let summary = size.map(|s| FileSummary {
                size: s as u64,
                checksum: checksum.and_then(|c| Checksum::parse(&c)),
            });
            Ok((version, summary))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Metadata-only copy sharing the same blob. Always produces a new
    /// `version_id`; refuses to copy a delete marker.
    pub fn copy(
        &self,
        conn: &Connection,
        dest_bucket_id: &Uuid,
        dest_key: Option<&str>,
    ) -> Result<ObjectVersion> {
        let file_id = self
            .file_id
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation("Cannot copy a delete marker.".to_string()))?;
        Self::create(
            conn,
            dest_bucket_id,
            dest_key.unwrap_or(&self.key),
            Some(file_id),
            self.mimetype.as_deref(),
        )
    }

    /// Create a delete marker as the new head. Returns `None` when the key
    /// has no live head.
    pub fn delete(conn: &Connection, bucket_id: &Uuid, key: &str) -> Result<Option<ObjectVersion>> {
        match Self::get(conn, bucket_id, key, None, false)? {
            Some(_) => Ok(Some(Self::create(conn, bucket_id, key, None, None)?)),
            None => Ok(None),
        }
    }

    /// Permanent hard delete of this version (and its tags). If this was
    /// the head, the most recent remaining version is promoted so that the
    /// one-head invariant holds. Callers are responsible for file cleanup.
    pub fn remove(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "DELETE FROM object_version_tags WHERE version_id = ?1",
            params![self.version_id.to_string()],
        )?;
        conn.execute(
            "DELETE FROM object_versions WHERE version_id = ?1",
            params![self.version_id.to_string()],
        )?;
        if self.is_head {
            conn.execute(
                "UPDATE object_versions SET is_head = 1, updated = ?1
                 WHERE version_id = (
                     SELECT version_id FROM object_versions
                     WHERE bucket_id = ?2 AND key = ?3
                     ORDER BY created DESC LIMIT 1
                 )",
                params![to_ts(&Utc::now()), self.bucket_id.to_string(), self.key],
            )?;
        }
        Ok(())
    }

    /// Reassign every version pointing at `old_file` to `new_file`.
    /// Precondition: both files carry the same checksum.
    pub fn relink_all(conn: &Connection, old_file: &Uuid, new_file: &Uuid) -> Result<usize> {
        let matching: i64 = conn.query_row(
            "SELECT COUNT(*) FROM file_instances a, file_instances b
             WHERE a.id = ?1 AND b.id = ?2 AND a.checksum = b.checksum",
            params![old_file.to_string(), new_file.to_string()],
            |row| row.get(0),
        )?;
        if matching == 0 {
            return Err(Error::InvalidOperation(
                "Cannot relink file instances with different checksums.".to_string(),
            ));
        }
        let changed = conn.execute(
            "UPDATE object_versions SET file_id = ?1, updated = ?2 WHERE file_id = ?3",
            params![
                new_file.to_string(),
                to_ts(&Utc::now()),
                old_file.to_string()
            ],
        )?;
        Ok(changed)
    }

    pub fn count_for_file(conn: &Connection, file_id: &Uuid) -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM object_versions WHERE file_id = ?1",
            params![file_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn set_tag(&self, conn: &Connection, key: &str, value: &str) -> Result<()> {
        let now = to_ts(&Utc::now());
        conn.execute(
            "INSERT INTO object_version_tags (version_id, key, value, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (version_id, key) DO UPDATE SET value = ?3, updated = ?4",
            params![self.version_id.to_string(), key, value, now],
        )?;
        Ok(())
    }

    pub fn tags(&self, conn: &Connection) -> Result<Vec<(String, String)>> {
        let mut stmt = conn.prepare(
            "SELECT key, value FROM object_version_tags WHERE version_id = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![self.version_id.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::models::{Bucket, FileInstance, Location};
    use crate::storage::BlobInfo;

    fn setup() -> (Database, Bucket) {
        let db = Database::open_in_memory().unwrap();
        let bucket = db
            .with(|conn| {
                Location::create(conn, "default", "/data", true, "fs")?;
                Bucket::create(conn, &Config::default(), None, None)
            })
            .unwrap();
        (db, bucket)
    }

    fn make_file(conn: &Connection, uri: &str, size: u64) -> FileInstance {
        let file = FileInstance::fresh(Some("S"));
        file.insert(conn).unwrap();
        FileInstance::finalize(
            conn,
            &file.id,
            &BlobInfo {
                uri: uri.to_string(),
                size,
                checksum: Some(Checksum::new("md5", "aabb")),
                readable: true,
                writable: false,
            },
        )
        .unwrap();
        FileInstance::get(conn, &file.id).unwrap().unwrap()
    }

    #[test]
    fn test_create_demotes_previous_head() {
        let (db, bucket) = setup();
        db.with(|conn| {
            let f1 = make_file(conn, "/a", 1);
            let f2 = make_file(conn, "/b", 2);

            let v1 = ObjectVersion::create(conn, &bucket.id, "k", Some(&f1.id), None)?;
            assert!(v1.is_head);
            let v2 = ObjectVersion::create(conn, &bucket.id, "k", Some(&f2.id), None)?;
            assert!(v2.is_head);
            assert_ne!(v1.version_id, v2.version_id);

            let head = ObjectVersion::get(conn, &bucket.id, "k", None, false)?.unwrap();
            assert_eq!(head.version_id, v2.version_id);

            let old = ObjectVersion::get(conn, &bucket.id, "k", Some(&v1.version_id), false)?
                .unwrap();
            assert!(!old.is_head);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_marker_hides_head() {
        let (db, bucket) = setup();
        db.with(|conn| {
            let f = make_file(conn, "/a", 1);
            let v1 = ObjectVersion::create(conn, &bucket.id, "k", Some(&f.id), None)?;

            let marker = ObjectVersion::delete(conn, &bucket.id, "k")?.unwrap();
            assert!(marker.is_delete_marker());

            // Head lookup without markers: nothing.
            assert!(ObjectVersion::get(conn, &bucket.id, "k", None, false)?.is_none());
            // The prior version stays reachable by id.
            assert!(
                ObjectVersion::get(conn, &bucket.id, "k", Some(&v1.version_id), false)?.is_some()
            );
            // Deleting again is a no-op.
            assert!(ObjectVersion::delete(conn, &bucket.id, "k")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_copy_shares_file_and_refuses_markers() {
        let (db, bucket) = setup();
        db.with(|conn| {
            let f = make_file(conn, "/a", 1);
            let v = ObjectVersion::create(conn, &bucket.id, "k", Some(&f.id), Some("text/plain"))?;

            let copy = v.copy(conn, &bucket.id, Some("k2"))?;
            assert_eq!(copy.file_id, v.file_id);
            assert_ne!(copy.version_id, v.version_id);
            assert_eq!(copy.mimetype.as_deref(), Some("text/plain"));

            let marker = ObjectVersion::delete(conn, &bucket.id, "k")?.unwrap();
            assert!(marker.copy(conn, &bucket.id, Some("k3")).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_remove_head_promotes_previous() {
        let (db, bucket) = setup();
        db.with(|conn| {
            let f1 = make_file(conn, "/a", 1);
            let f2 = make_file(conn, "/b", 2);
            let v1 = ObjectVersion::create(conn, &bucket.id, "k", Some(&f1.id), None)?;
            let v2 = ObjectVersion::create(conn, &bucket.id, "k", Some(&f2.id), None)?;

            v2.remove(conn)?;
            let head = ObjectVersion::get(conn, &bucket.id, "k", None, false)?.unwrap();
            assert_eq!(head.version_id, v1.version_id);
            assert!(head.is_head);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_listing_heads_and_versions() {
        let (db, bucket) = setup();
        db.with(|conn| {
            let f1 = make_file(conn, "/a", 1);
            let f2 = make_file(conn, "/b", 2);
            ObjectVersion::create(conn, &bucket.id, "k", Some(&f1.id), None)?;
            ObjectVersion::create(conn, &bucket.id, "k", Some(&f2.id), None)?;

            let heads = ObjectVersion::get_by_bucket(conn, &bucket.id, false, None)?;
            assert_eq!(heads.len(), 1);
            assert_eq!(heads[0].1.as_ref().unwrap().size, 2);

            let all = ObjectVersion::get_by_bucket(conn, &bucket.id, true, None)?;
            assert_eq!(all.len(), 2);
            // Newest first within the key.
            assert!(all[0].0.is_head);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_relink_requires_matching_checksum() {
        let (db, bucket) = setup();
        db.with(|conn| {
            let old = make_file(conn, "/a", 1);
            let new = make_file(conn, "/b", 1); // same checksum constant
            ObjectVersion::create(conn, &bucket.id, "k", Some(&old.id), None)?;

            let relinked = ObjectVersion::relink_all(conn, &old.id, &new.id)?;
            assert_eq!(relinked, 1);
            assert_eq!(ObjectVersion::count_for_file(conn, &old.id)?, 0);
            assert_eq!(ObjectVersion::count_for_file(conn, &new.id)?, 1);

            // A file with a different checksum cannot take over.
            let odd = FileInstance::fresh(None);
            odd.insert(conn)?;
            FileInstance::finalize(
                conn,
                &odd.id,
                &BlobInfo {
                    uri: "/c".to_string(),
                    size: 1,
                    checksum: Some(Checksum::new("md5", "ffff")),
                    readable: true,
                    writable: false,
                },
            )?;
            assert!(ObjectVersion::relink_all(conn, &new.id, &odd.id).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_tags_roundtrip() {
        let (db, bucket) = setup();
        db.with(|conn| {
            let f = make_file(conn, "/a", 1);
            let v = ObjectVersion::create(conn, &bucket.id, "k", Some(&f.id), None)?;
            v.set_tag(conn, "source", "ingest")?;
            v.set_tag(conn, "source", "batch")?;
            assert_eq!(v.tags(conn)?, vec![("source".to_string(), "batch".to_string())]);
            Ok(())
        })
        .unwrap();
    }
}
