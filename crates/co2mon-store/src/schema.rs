//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Create the schema on a fresh database.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        Ok(())
    } else {
        check(conn)
    }
}

/// Verify an existing database, migrating it if it is older.
pub fn check(conn: &Connection) -> Result<()> {
    match get_schema_version(conn)? {
        0 => Err(Error::NotInitialized),
        v if v > SCHEMA_VERSION => Err(Error::UnsupportedVersion(v)),
        v if v < SCHEMA_VERSION => migrate(conn, v),
        _ => Ok(()),
    }
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Store-wide settings and consolidation state
        CREATE TABLE IF NOT EXISTS store_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            step INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            last_update INTEGER NOT NULL,
            state TEXT NOT NULL
        );

        -- Data sources, in value order
        CREATE TABLE IF NOT EXISTS data_sources (
            idx INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            heartbeat INTEGER NOT NULL,
            min REAL,
            max REAL
        );

        -- Round-robin archives
        CREATE TABLE IF NOT EXISTS archives (
            idx INTEGER PRIMARY KEY,
            consolidation TEXT NOT NULL,
            xff REAL NOT NULL,
            steps INTEGER NOT NULL,
            rows INTEGER NOT NULL
        );

        -- Archive rows, one per slot and data source; slots are overwritten in place
        CREATE TABLE IF NOT EXISTS archive_rows (
            archive INTEGER NOT NULL REFERENCES archives(idx),
            slot INTEGER NOT NULL,
            ds INTEGER NOT NULL REFERENCES data_sources(idx),
            ends_at INTEGER NOT NULL,
            value REAL,
            PRIMARY KEY (archive, slot, ds)
        );
        CREATE INDEX IF NOT EXISTS idx_archive_rows_time
            ON archive_rows(archive, ends_at);
        "#,
    )?;

    Ok(())
}

/// Run migrations from old_version to current.
fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    tracing::info!(
        "Migrating store schema from version {} to {}",
        old_version,
        SCHEMA_VERSION
    );
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "archive_rows",
            "archives",
            "data_sources",
            "schema_version",
            "store_meta",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
        assert!(matches!(check(&conn), Err(Error::NotInitialized)));

        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        check(&conn).unwrap();
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(
            check(&conn),
            Err(Error::UnsupportedVersion(v)) if v == SCHEMA_VERSION + 1
        ));
    }
}
