//! SQLite schema for the persistent sync area
//!
//! The area is a single key/value table holding compact JSON values, so the
//! same keys and chunk layout work against SQLite and the browser area.
//! Every row also records its quota size so usage can be summed in SQL.

use rusqlite::{Connection, Result};
use tracing::info;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Bring the schema up to `SCHEMA_VERSION`, one step at a time
pub fn migrate(conn: &Connection) -> Result<()> {
    let from = get_schema_version(conn)?.unwrap_or(0);
    if from >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    if from < 1 {
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_info (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
    }
    if from < 2 {
        // Size as the quota counts it: key length plus compact JSON length
        tx.execute_batch(
            r#"
            ALTER TABLE kv ADD COLUMN size_bytes INTEGER NOT NULL DEFAULT 0;
            UPDATE kv SET size_bytes = length(CAST(key AS BLOB)) + length(CAST(value AS BLOB));
            "#,
        )?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;

    info!("Migrated sync area schema from v{} to v{}", from, SCHEMA_VERSION);
    Ok(())
}

/// Get the current schema version from the database
///
/// `None` for a fresh database.
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let table_exists = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")?
        .exists([])?;
    if !table_exists {
        return Ok(None);
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            e => Err(e),
        })?;
    Ok(version.and_then(|v| v.parse().ok()))
}
