//! Versioned database migrations.
//!
//! Migrations run sequentially from the stored version to
//! `DB_SCHEMA_VERSION`. Each one must be safe to re-run.

use pl_core::constants::DB_SCHEMA_VERSION;
use pl_core::error::{PlError, PlResult};
use rusqlite::Connection;
use tracing::{info, warn};

/// Run all pending migrations on the database.
pub fn run_migrations(conn: &Connection) -> PlResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version >= DB_SCHEMA_VERSION {
        info!("database schema is up to date (version {current_version})");
        return Ok(());
    }

    info!("running migrations from version {current_version} to {DB_SCHEMA_VERSION}");

    for version in (current_version + 1)..=DB_SCHEMA_VERSION {
        run_migration(conn, version)?;
    }

    set_schema_version(conn, DB_SCHEMA_VERSION)?;
    info!("migrations complete, schema at version {DB_SCHEMA_VERSION}");
    Ok(())
}

fn get_schema_version(conn: &Connection) -> PlResult<i32> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| PlError::Database(e.to_string()))?;

    if count == 0 {
        conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])
            .map_err(|e| PlError::Database(e.to_string()))?;
        return Ok(0);
    }

    conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map_err(|e| PlError::Database(e.to_string()))
}

fn set_schema_version(conn: &Connection, version: i32) -> PlResult<()> {
    conn.execute("UPDATE schema_version SET version = ?1", [version])
        .map_err(|e| PlError::Migration(e.to_string()))?;
    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> PlResult<()> {
    info!("applying migration version {version}");

    match version {
        1 => migration_v1(conn),
        _ => {
            warn!("unknown migration version {version}, skipping");
            Ok(())
        }
    }
}

/// Migration v1: normalize category and timer state written by older builds.
///
/// A stored category of 0 means "never computed", so it becomes NULL and is
/// recomputed on the next scan. Owed timers whose message is gone are dropped.
fn migration_v1(conn: &Connection) -> PlResult<()> {
    let reset = conn
        .execute(
            "UPDATE messages SET cached_category = NULL WHERE cached_category = 0",
            [],
        )
        .map_err(|e| PlError::Migration(e.to_string()))?;

    let dropped = conn
        .execute(
            "DELETE FROM destruction_timers
             WHERE message_id NOT IN (SELECT id FROM messages)",
            [],
        )
        .map_err(|e| PlError::Migration(e.to_string()))?;

    if reset > 0 || dropped > 0 {
        info!(reset, dropped, "normalized legacy category and timer rows");
    }

    Ok(())
}
