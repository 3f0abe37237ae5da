//! Metadata catalog entities and their repository operations.
//!
//! Plain row structs plus free-standing repository functions over a
//! `rusqlite::Connection`; invariants (head uniqueness, size accounting,
//! lock/delete gates, fixity state) are enforced in these write paths and
//! by the schema's constraints. Callers group multi-statement operations in
//! a transaction (`Transaction` derefs to `Connection`, so every function
//! here works inside one).

mod bucket;
mod file_instance;
mod location;
mod multipart;
mod object_version;

pub use bucket::{Bucket, BucketTag};
pub use file_instance::FileInstance;
pub use location::Location;
pub use multipart::{part_layout, MultipartObject, Part};
pub use object_version::{FileSummary, ObjectVersion};

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Timestamps are stored as RFC 3339 text with microsecond precision, which
/// keeps lexicographic and chronological order identical.
pub(crate) fn to_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
    }
}

pub(crate) fn uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn opt_uuid_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(&raw).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        }),
    }
}
