//! SQLite store handle, migrations and the query facade.
//!
//! # Responsibility
//! - Open, configure and close the single connection behind a `StoreHandle`.
//! - Apply caller-supplied schema migrations in deterministic order.
//! - Expose the predicate-based query facade used by repositories.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No entity reads/writes happen before migrations succeed.
//! - A closed handle rejects every further call with `DbError::Closed`.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod handle;
pub mod migrations;
pub mod query;

pub use handle::StoreHandle;
pub use migrations::Migration;
pub use query::{Order, Predicate, Query};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    InvalidMigrationOrder {
        previous: u32,
        next: u32,
    },
    Closed,
    Poisoned,
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidMigrationOrder { previous, next } => write!(
                f,
                "migration versions must strictly increase: {next} follows {previous}"
            ),
            Self::Closed => write!(f, "store handle is closed"),
            Self::Poisoned => write!(f, "store connection lock is poisoned"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. }
            | Self::InvalidMigrationOrder { .. }
            | Self::Closed
            | Self::Poisoned => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
