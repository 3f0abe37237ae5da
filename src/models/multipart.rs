//! Multipart uploads and their parts.

use super::{to_ts, ts_col, uuid_col};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::types::Checksum;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Compute `(last_part_number, last_part_size)` for a fixed-part-size
/// upload. When the size is an exact multiple of the part size, the final
/// part is a full part rather than an empty one.
pub fn part_layout(size: u64, chunk_size: u64) -> (u64, u64) {
    let mut last_part_number = size / chunk_size;
    let mut last_part_size = size - last_part_number * chunk_size;
    if last_part_size == 0 && size > 0 {
        last_part_number -= 1;
        last_part_size = chunk_size;
    }
    (last_part_number, last_part_size)
}

/// An in-progress resumable upload, writing fixed-size parts into a
/// preallocated FileInstance.
#[derive(Debug, Clone)]
pub struct MultipartObject {
    pub upload_id: Uuid,
    pub bucket_id: Uuid,
    pub key: String,
    pub file_id: Uuid,
    pub chunk_size: u64,
    pub size: u64,
    pub last_part_number: u64,
    pub last_part_size: u64,
    pub completed: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl MultipartObject {
    const COLUMNS: &'static str = "upload_id, bucket_id, key, file_id, chunk_size, size, \
         last_part_number, last_part_size, completed, created, updated";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            upload_id: uuid_col(row, 0)?,
            bucket_id: uuid_col(row, 1)?,
            key: row.get(2)?,
            file_id: uuid_col(row, 3)?,
            chunk_size: row.get::<_, i64>(4)? as u64,
            size: row.get::<_, i64>(5)? as u64,
            last_part_number: row.get::<_, i64>(6)? as u64,
            last_part_size: row.get::<_, i64>(7)? as u64,
            completed: row.get(8)?,
            created: ts_col(row, 9)?,
            updated: ts_col(row, 10)?,
        })
    }

    /// Validate the requested geometry and persist the upload row.
    pub fn create(
        conn: &Connection,
        config: &Config,
        bucket_id: &Uuid,
        key: &str,
        file_id: &Uuid,
        size: u64,
        chunk_size: u64,
    ) -> Result<MultipartObject> {
        if chunk_size < config.multipart_chunksize_min || chunk_size > config.multipart_chunksize_max
        {
            return Err(Error::MultipartInvalidChunkSize(format!(
                "Part size must be between {} and {} bytes",
                config.multipart_chunksize_min, config.multipart_chunksize_max
            )));
        }
        if size == 0 {
            return Err(Error::FileSize(
                "Multipart upload size must be positive.".to_string(),
            ));
        }
        let (last_part_number, last_part_size) = part_layout(size, chunk_size);
        if last_part_number + 1 > config.multipart_max_parts {
            return Err(Error::MultipartInvalidPartNumber(format!(
                "Upload would need more than {} parts",
                config.multipart_max_parts
            )));
        }

        let upload_id = Uuid::new_v4();
        let now = to_ts(&Utc::now());
        conn.execute(
            "INSERT INTO multipart_objects
             (upload_id, bucket_id, key, file_id, chunk_size, size,
              last_part_number, last_part_size, completed, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
            params![
                upload_id.to_string(),
                bucket_id.to_string(),
                key,
                file_id.to_string(),
                chunk_size as i64,
                size as i64,
                last_part_number as i64,
                last_part_size as i64,
                now
            ],
        )?;
        Self::get(conn, &upload_id, true)?.ok_or(Error::NotFound("Multipart upload"))
    }

    /// Fetch an upload; completed uploads are invisible unless
    /// `with_completed` is set.
    pub fn get(
        conn: &Connection,
        upload_id: &Uuid,
        with_completed: bool,
    ) -> Result<Option<MultipartObject>> {
        let mut sql = format!(
            "SELECT {} FROM multipart_objects WHERE upload_id = ?1",
            Self::COLUMNS
        );
        if !with_completed {
            sql.push_str(" AND completed = 0");
        }
        Ok(conn
            .query_row(&sql, params![upload_id.to_string()], Self::from_row)
            .optional()?)
    }

    pub fn query_by_bucket(
        conn: &Connection,
        bucket_id: &Uuid,
        limit: u64,
    ) -> Result<Vec<MultipartObject>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM multipart_objects
             WHERE bucket_id = ?1 AND completed = 0
             ORDER BY key, created LIMIT ?2",
            Self::COLUMNS
        ))?;
        let rows = stmt.query_map(params![bucket_id.to_string(), limit as i64], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Expected byte size of `part_number`, or an error for out-of-range
    /// numbers.
    pub fn expected_part_size(&self, part_number: u64) -> Result<u64> {
        if part_number > self.last_part_number {
            return Err(Error::MultipartInvalidPartNumber(format!(
                "Part number must be between 0 and {}",
                self.last_part_number
            )));
        }
        Ok(if part_number == self.last_part_number {
            self.last_part_size
        } else {
            self.chunk_size
        })
    }

    /// Byte offset of `part_number` within the preallocated blob.
    pub fn part_offset(&self, part_number: u64) -> u64 {
        part_number * self.chunk_size
    }

    /// Terminal transition: refuse double completion and completion with
    /// missing parts.
    pub fn mark_completed(&self, conn: &Connection) -> Result<()> {
        if self.completed {
            return Err(Error::MultipartAlreadyCompleted);
        }
        if Part::count(conn, &self.upload_id)? != self.last_part_number + 1 {
            return Err(Error::MultipartMissingParts);
        }
        conn.execute(
            "UPDATE multipart_objects SET completed = 1, updated = ?1 WHERE upload_id = ?2",
            params![to_ts(&Utc::now()), self.upload_id.to_string()],
        )?;
        Ok(())
    }

    /// Remove the upload row; parts cascade.
    pub fn delete(conn: &Connection, upload_id: &Uuid) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM multipart_objects WHERE upload_id = ?1",
            params![upload_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Refresh `updated` so in-progress uploads do not expire under their
    /// clients.
    pub fn touch(conn: &Connection, upload_id: &Uuid) -> Result<()> {
        conn.execute(
            "UPDATE multipart_objects SET updated = ?1 WHERE upload_id = ?2",
            params![to_ts(&Utc::now()), upload_id.to_string()],
        )?;
        Ok(())
    }

    /// Incomplete uploads whose last activity predates `expires`.
    pub fn expired(conn: &Connection, expires: Duration) -> Result<Vec<MultipartObject>> {
        let cutoff = Utc::now() - expires;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM multipart_objects
             WHERE completed = 0 AND updated < ?1
             ORDER BY updated",
            Self::COLUMNS
        ))?;
        let rows = stmt.query_map(params![to_ts(&cutoff)], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Completed uploads whose merge has not landed yet (used to retry
    /// merges after a crash).
    pub fn pending_merges(conn: &Connection) -> Result<Vec<MultipartObject>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM multipart_objects WHERE completed = 1 ORDER BY updated",
            Self::COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

/// One uploaded part of a multipart upload. Re-uploading a part number
/// replaces the previous row wholesale.
#[derive(Debug, Clone)]
pub struct Part {
    pub upload_id: Uuid,
    pub part_number: u64,
    pub checksum: Option<Checksum>,
    pub start_byte: u64,
    pub end_byte: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Part {
    const COLUMNS: &'static str =
        "upload_id, part_number, checksum, start_byte, end_byte, created, updated";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let checksum: Option<String> = row.get(2)?;
        Ok(Self {
            upload_id: uuid_col(row, 0)?,
            part_number: row.get::<_, i64>(1)? as u64,
            checksum: checksum.and_then(|c| Checksum::parse(&c)),
            start_byte: row.get::<_, i64>(3)? as u64,
            end_byte: row.get::<_, i64>(4)? as u64,
            created: ts_col(row, 5)?,
            updated: ts_col(row, 6)?,
        })
    }

    /// Delete-and-recreate upsert: a retried part never merges with the
    /// previous attempt's row.
    pub fn replace(
        conn: &Connection,
        upload_id: &Uuid,
        part_number: u64,
        checksum: &Checksum,
        start_byte: u64,
        end_byte: u64,
    ) -> Result<Part> {
        Self::delete(conn, upload_id, part_number)?;
        let now = to_ts(&Utc::now());
        conn.execute(
            "INSERT INTO parts
             (upload_id, part_number, checksum, start_byte, end_byte, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                upload_id.to_string(),
                part_number as i64,
                checksum.as_str(),
                start_byte as i64,
                end_byte as i64,
                now
            ],
        )?;
        Self::get(conn, upload_id, part_number)?.ok_or(Error::NotFound("Part"))
    }

    pub fn get(conn: &Connection, upload_id: &Uuid, part_number: u64) -> Result<Option<Part>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM parts WHERE upload_id = ?1 AND part_number = ?2",
                    Self::COLUMNS
                ),
                params![upload_id.to_string(), part_number as i64],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn delete(conn: &Connection, upload_id: &Uuid, part_number: u64) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM parts WHERE upload_id = ?1 AND part_number = ?2",
            params![upload_id.to_string(), part_number as i64],
        )?;
        Ok(changed > 0)
    }

    pub fn query_by_multipart(
        conn: &Connection,
        upload_id: &Uuid,
        limit: u64,
    ) -> Result<Vec<Part>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM parts WHERE upload_id = ?1 ORDER BY part_number LIMIT ?2",
            Self::COLUMNS
        ))?;
        let rows = stmt.query_map(params![upload_id.to_string(), limit as i64], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn count(conn: &Connection, upload_id: &Uuid) -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM parts WHERE upload_id = ?1",
            params![upload_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
