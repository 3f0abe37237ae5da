//! Named storage roots.

use super::{to_ts, ts_col};
use crate::config::LocationConfig;
use crate::errors::{Error, Result};
use crate::types::is_valid_location_name;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// A named, addressable storage root.
#[derive(Debug, Clone)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub uri: String,
    pub default: bool,
    pub storage_backend: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Location {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            uri: row.get(2)?,
            default: row.get(3)?,
            storage_backend: row.get(4)?,
            created: ts_col(row, 5)?,
            updated: ts_col(row, 6)?,
        })
    }

    const COLUMNS: &'static str =
        "id, name, uri, is_default, storage_backend, created, updated";

    pub fn create(
        conn: &Connection,
        name: &str,
        uri: &str,
        default: bool,
        storage_backend: &str,
    ) -> Result<Location> {
        if !is_valid_location_name(name) {
            return Err(Error::InvalidOperation(
                "Invalid location name (lower-case alphanumeric + dashes).".to_string(),
            ));
        }
        let now = to_ts(&Utc::now());
        conn.execute(
            "INSERT INTO locations (name, uri, is_default, storage_backend, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![name, uri, default, storage_backend, now],
        )?;
        Self::get_by_name(conn, name)?.ok_or(Error::NotFound("Location"))
    }

    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Location>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM locations WHERE id = ?1", Self::COLUMNS),
                params![id],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Location>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM locations WHERE name = ?1", Self::COLUMNS),
                params![name],
                Self::from_row,
            )
            .optional()?)
    }

    /// The single default location (a partial unique index guarantees at
    /// most one row can be marked default).
    pub fn get_default(conn: &Connection) -> Result<Option<Location>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM locations WHERE is_default = 1",
                    Self::COLUMNS
                ),
                [],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn all(conn: &Connection) -> Result<Vec<Location>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM locations ORDER BY name",
            Self::COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Preferred location by name, else the default.
    pub fn resolve(conn: &Connection, preferred: Option<&str>) -> Result<Location> {
        let location = match preferred {
            Some(name) => Self::get_by_name(conn, name)?,
            None => Self::get_default(conn)?,
        };
        location.ok_or(Error::NotFound("Location"))
    }

    /// Seed configured locations at startup; existing rows keep their id
    /// but pick up URI/backend/default changes.
    pub fn seed(conn: &Connection, configured: &[LocationConfig]) -> Result<()> {
        // Single-entry configs are implicitly default.
        let implicit_default = configured.len() == 1;
        for loc in configured {
            let default = loc.default || implicit_default;
            match Self::get_by_name(conn, &loc.name)? {
                Some(existing) => {
                    conn.execute(
                        "UPDATE locations
                         SET uri = ?1, is_default = ?2, storage_backend = ?3, updated = ?4
                         WHERE id = ?5",
                        params![
                            loc.uri,
                            default,
                            loc.storage_backend,
                            to_ts(&Utc::now()),
                            existing.id
                        ],
                    )?;
                }
                None => {
                    Self::create(conn, &loc.name, &loc.uri, default, &loc.storage_backend)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_create_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            let loc = Location::create(conn, "primary", "/data", true, "fs")?;
            assert_eq!(loc.name, "primary");
            assert!(loc.default);

            assert!(Location::get_by_name(conn, "primary")?.is_some());
            assert!(Location::get_by_name(conn, "absent")?.is_none());
            assert_eq!(Location::get_default(conn)?.unwrap().id, loc.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_invalid_slug_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            assert!(Location::create(conn, "Bad Name", "/data", false, "fs").is_err());
            assert!(Location::create(conn, "x", "/data", false, "fs").is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_resolve_prefers_named_location() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            Location::create(conn, "primary", "/a", true, "fs")?;
            Location::create(conn, "archive", "/b", false, "fs")?;

            assert_eq!(Location::resolve(conn, None)?.name, "primary");
            assert_eq!(Location::resolve(conn, Some("archive"))?.name, "archive");
            assert!(Location::resolve(conn, Some("missing")).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_seed_is_idempotent_and_updates() {
        let db = Database::open_in_memory().unwrap();
        let configured = vec![LocationConfig {
            name: "default".to_string(),
            uri: "/v1".to_string(),
            default: false, // single entry becomes default implicitly
            storage_backend: "fs".to_string(),
        }];
        db.with(|conn| {
            Location::seed(conn, &configured)?;
            assert_eq!(Location::get_default(conn)?.unwrap().uri, "/v1");

            let mut updated = configured.clone();
            updated[0].uri = "/v2".to_string();
            Location::seed(conn, &updated)?;
            assert_eq!(Location::get_default(conn)?.unwrap().uri, "/v2");
            assert_eq!(Location::all(conn)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }
}
