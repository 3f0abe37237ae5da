//! Buckets and bucket tags.

use super::{to_ts, ts_col, uuid_col, Location, ObjectVersion};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::types::SizeLimit;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Container of object versions with its own quota and defaults.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub id: Uuid,
    pub default_location: i64,
    pub default_storage_class: String,
    /// Denormalized sum of all contained file sizes, historical versions
    /// included.
    pub size: u64,
    pub quota_size: Option<u64>,
    pub max_file_size: Option<u64>,
    pub locked: bool,
    pub deleted: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Bucket {
    const COLUMNS: &'static str = "id, default_location, default_storage_class, size, \
         quota_size, max_file_size, locked, deleted, created, updated";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_col(row, 0)?,
            default_location: row.get(1)?,
            default_storage_class: row.get(2)?,
            size: row.get::<_, i64>(3)? as u64,
            quota_size: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
            max_file_size: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
            locked: row.get(6)?,
            deleted: row.get(7)?,
            created: ts_col(row, 8)?,
            updated: ts_col(row, 9)?,
        })
    }

    /// Create a bucket in `location` (default location when `None`), with
    /// the configured default storage class, quota, and file size cap.
    pub fn create(
        conn: &Connection,
        config: &Config,
        location: Option<&str>,
        storage_class: Option<&str>,
    ) -> Result<Bucket> {
        let location = Location::resolve(conn, location)?;
        let storage_class = storage_class.unwrap_or(&config.default_storage_class);
        if !config.storage_class_list.contains_key(storage_class) {
            return Err(Error::InvalidOperation("Invalid storage class.".to_string()));
        }

        let id = Uuid::new_v4();
        let now = to_ts(&Utc::now());
        conn.execute(
            "INSERT INTO buckets
             (id, default_location, default_storage_class, size, quota_size, max_file_size,
              locked, deleted, created, updated)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, 0, 0, ?6, ?6)",
            params![
                id.to_string(),
                location.id,
                storage_class,
                config.default_quota_size.map(|v| v as i64),
                config.default_max_file_size.map(|v| v as i64),
                now
            ],
        )?;
        Self::get(conn, &id)?.ok_or(Error::NotFound("Bucket"))
    }

    /// Fetch a live bucket (soft-deleted buckets are invisible).
    pub fn get(conn: &Connection, id: &Uuid) -> Result<Option<Bucket>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM buckets WHERE id = ?1 AND deleted = 0",
                    Self::COLUMNS
                ),
                params![id.to_string()],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn all(conn: &Connection) -> Result<Vec<Bucket>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM buckets WHERE deleted = 0 ORDER BY created",
            Self::COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Reject mutations on locked buckets.
    pub fn ensure_mutable(&self) -> Result<()> {
        if self.locked {
            return Err(Error::BucketLocked);
        }
        Ok(())
    }

    /// The tightest applicable size limit for a new upload, with the reason
    /// it applies. `None` means unlimited.
    pub fn size_limit(&self) -> Option<SizeLimit> {
        let mut limits: Vec<SizeLimit> = Vec::new();
        if let Some(quota) = self.quota_size {
            limits.push(SizeLimit::new(
                quota.saturating_sub(self.size),
                "Bucket quota exceeded.",
            ));
        }
        if let Some(max) = self.max_file_size {
            limits.push(SizeLimit::new(max, "Maximum file size exceeded."));
        }
        limits.into_iter().min_by_key(|l| l.limit)
    }

    /// Adjust the denormalized size. Negative deltas clamp at zero via the
    /// schema CHECK failing loudly instead of wrapping.
    pub fn add_size(conn: &Connection, id: &Uuid, delta: i64) -> Result<()> {
        let changed = conn.execute(
            "UPDATE buckets SET size = size + ?1, updated = ?2 WHERE id = ?3",
            params![delta, to_ts(&Utc::now()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound("Bucket"));
        }
        Ok(())
    }

    pub fn set_locked(conn: &Connection, id: &Uuid, locked: bool) -> Result<()> {
        conn.execute(
            "UPDATE buckets SET locked = ?1, updated = ?2 WHERE id = ?3",
            params![locked, to_ts(&Utc::now()), id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_quota(
        conn: &Connection,
        id: &Uuid,
        quota_size: Option<u64>,
        max_file_size: Option<u64>,
    ) -> Result<()> {
        conn.execute(
            "UPDATE buckets SET quota_size = ?1, max_file_size = ?2, updated = ?3 WHERE id = ?4",
            params![
                quota_size.map(|v| v as i64),
                max_file_size.map(|v| v as i64),
                to_ts(&Utc::now()),
                id.to_string()
            ],
        )?;
        Ok(())
    }

    /// Soft-delete; all further object/version operations are refused
    /// because `get` no longer returns the bucket.
    pub fn soft_delete(conn: &Connection, id: &Uuid) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE buckets SET deleted = 1, updated = ?1 WHERE id = ?2 AND deleted = 0",
            params![to_ts(&Utc::now()), id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Create a new bucket with the same location/class/quota and copy every
    /// head object version into it (metadata only — blobs are shared by
    /// `file_id`).
    pub fn snapshot(&self, conn: &Connection, config: &Config, lock: bool) -> Result<Bucket> {
        if self.deleted {
            return Err(Error::InvalidOperation(
                "Cannot make snapshot of a deleted bucket.".to_string(),
            ));
        }

        let location = Location::get_by_id(conn, self.default_location)?
            .ok_or(Error::NotFound("Location"))?;
        let snapshot = Bucket::create(
            conn,
            config,
            Some(&location.name),
            Some(&self.default_storage_class),
        )?;
        Bucket::set_quota(conn, &snapshot.id, self.quota_size, self.max_file_size)?;

        let mut copied_bytes: i64 = 0;
        for (head, file) in ObjectVersion::get_by_bucket(conn, &self.id, false, None)? {
            head.copy(conn, &snapshot.id, None)?;
            if let Some(file) = file {
                copied_bytes += file.size as i64;
            }
        }
        if copied_bytes > 0 {
            Bucket::add_size(conn, &snapshot.id, copied_bytes)?;
        }

        if lock {
            Bucket::set_locked(conn, &snapshot.id, true)?;
        }
        Self::get(conn, &snapshot.id)?.ok_or(Error::NotFound("Bucket"))
    }
}

/// (bucket, key) → value tag pairs, cascade-deleted with the bucket.
#[derive(Debug, Clone)]
pub struct BucketTag {
    pub bucket_id: Uuid,
    pub key: String,
    pub value: String,
}

impl BucketTag {
    pub fn set(conn: &Connection, bucket_id: &Uuid, key: &str, value: &str) -> Result<()> {
        let now = to_ts(&Utc::now());
        conn.execute(
            "INSERT INTO bucket_tags (bucket_id, key, value, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (bucket_id, key) DO UPDATE SET value = ?3, updated = ?4",
            params![bucket_id.to_string(), key, value, now],
        )?;
        Ok(())
    }

    pub fn get(conn: &Connection, bucket_id: &Uuid, key: &str) -> Result<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT value FROM bucket_tags WHERE bucket_id = ?1 AND key = ?2",
                params![bucket_id.to_string(), key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn delete(conn: &Connection, bucket_id: &Uuid, key: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM bucket_tags WHERE bucket_id = ?1 AND key = ?2",
            params![bucket_id.to_string(), key],
        )?;
        Ok(changed > 0)
    }

    pub fn all(conn: &Connection, bucket_id: &Uuid) -> Result<Vec<(String, String)>> {
        let mut stmt = conn.prepare(
            "SELECT key, value FROM bucket_tags WHERE bucket_id = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![bucket_id.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}
