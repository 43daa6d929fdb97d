//! Schema migration executor for caller-supplied migration lists.
//!
//! # Responsibility
//! - Validate that migration versions strictly increase.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - A database newer than the migration list is never touched.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// One schema step; `sql` may hold several statements.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

/// Returns the latest version declared by `migrations`.
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |migration| migration.version)
}

/// Applies all migrations newer than the connection's `user_version`.
pub fn apply_migrations(conn: &mut Connection, migrations: &[Migration]) -> DbResult<()> {
    ensure_increasing(migrations)?;

    let current_version = current_user_version(conn)?;
    let latest = latest_version(migrations);

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in migrations
        .iter()
        .filter(|migration| migration.version > current_version)
    {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        current_version, latest
    );
    Ok(())
}

/// Reads the schema version recorded on the connection.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

fn ensure_increasing(migrations: &[Migration]) -> DbResult<()> {
    let mut previous = 0;
    for migration in migrations {
        if migration.version <= previous {
            return Err(DbError::InvalidMigrationOrder {
                previous,
                next: migration.version,
            });
        }
        previous = migration.version;
    }
    Ok(())
}
