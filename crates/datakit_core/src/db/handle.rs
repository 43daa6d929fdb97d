//! Explicit store handle with open/close lifecycle.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections and run migrations.
//! - Serialize statement execution over one shared connection.
//! - Provide raw row insert/update and explicit transactions.
//!
//! # Invariants
//! - Returned handles have pragmas configured and migrations fully applied.
//! - Each facade call holds the connection lock for one statement only.
//! - An open transaction reserves the connection for the thread that began it;
//!   other threads wait until it commits or rolls back.

use super::migrations::{apply_migrations, Migration};
use super::query::{quote_identifier, Query};
use super::{DbError, DbResult};
use crate::config::StoreConfig;
use crate::model::{EntityKey, FieldMap, FieldValue};
use log::{error, info};
use rusqlite::{params_from_iter, Connection};
use std::fmt::{Debug, Formatter};
use std::iter;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Cloneable handle to one SQLite connection.
///
/// Clones share the connection; `close` on any clone closes it for all.
#[derive(Clone)]
pub struct StoreHandle {
    shared: Arc<Shared>,
}

struct Shared {
    slot: Mutex<Slot>,
    released: Condvar,
}

struct Slot {
    conn: Option<Connection>,
    /// Thread running the open `transaction`, if any.
    owner: Option<ThreadId>,
}

impl StoreHandle {
    /// Opens a SQLite database file and applies `migrations`.
    ///
    /// # Side effects
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(path: impl AsRef<Path>, migrations: &[Migration]) -> DbResult<Self> {
        Self::open_with_config(&StoreConfig::at_path(path.as_ref()), migrations)
    }

    /// Opens an in-memory SQLite database and applies `migrations`.
    pub fn open_in_memory(migrations: &[Migration]) -> DbResult<Self> {
        Self::open_with_config(&StoreConfig::default(), migrations)
    }

    /// Opens the database described by `config` and applies `migrations`.
    pub fn open_with_config(config: &StoreConfig, migrations: &[Migration]) -> DbResult<Self> {
        let mode = if config.path.is_some() { "file" } else { "memory" };
        let started_at = Instant::now();
        info!("event=db_open module=db status=start mode={mode}");

        let opened = match config.path.as_deref() {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        };
        let mut conn = match opened {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={err}",
                    started_at.elapsed().as_millis()
                );
                return Err(err.into());
            }
        };

        if let Err(err) = bootstrap_connection(&mut conn, config, migrations) {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={err}",
                started_at.elapsed().as_millis()
            );
            return Err(err);
        }

        info!(
            "event=db_open module=db status=ok mode={mode} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    conn: Some(conn),
                    owner: None,
                }),
                released: Condvar::new(),
            }),
        })
    }

    /// Closes the shared connection. Closing twice is a no-op.
    pub fn close(&self) -> DbResult<()> {
        let mut guard = self.acquire()?;
        let Some(conn) = guard.conn.take() else {
            return Ok(());
        };

        match conn.close() {
            Ok(()) => {
                info!("event=db_close module=db status=ok");
                Ok(())
            }
            Err((conn, err)) => {
                error!("event=db_close module=db status=error error={err}");
                guard.conn = Some(conn);
                Err(err.into())
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared
            .slot
            .lock()
            .map(|slot| slot.conn.is_some())
            .unwrap_or(false)
    }

    /// Runs `f` against the open connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        let guard = self.acquire()?;
        let conn = guard.conn.as_ref().ok_or(DbError::Closed)?;
        Ok(f(conn)?)
    }

    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.with_connection(|conn| conn.execute_batch(sql))
    }

    /// Starts a predicate query over `table`.
    pub fn filter(&self, table: &str) -> Query {
        Query::new(self.clone(), table)
    }

    /// Runs `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when `f` succeeds and rolls back when it fails or panics.
    /// Called from the thread that already holds a transaction, `f` joins the
    /// outer transaction. Calls from other threads wait until it finishes.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&StoreHandle) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        {
            let mut slot = self.acquire()?;
            let conn = slot.conn.as_ref().ok_or(DbError::Closed)?;
            if !conn.is_autocommit() {
                drop(slot);
                return f(self);
            }
            conn.execute_batch("BEGIN IMMEDIATE;")
                .map_err(DbError::from)?;
            slot.owner = Some(thread::current().id());
        }

        let owner = TransactionOwner {
            shared: &self.shared,
        };
        let value = f(self)?;
        self.execute_batch("COMMIT;")?;
        drop(owner);
        Ok(value)
    }

    /// Inserts one row and returns the store-assigned rowid.
    pub fn insert(&self, table: &str, fields: &FieldMap) -> DbResult<i64> {
        let sql = if fields.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES;", quote_identifier(table))
        } else {
            let columns = fields
                .keys()
                .map(|column| quote_identifier(column))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; fields.len()].join(", ");
            format!(
                "INSERT INTO {} ({columns}) VALUES ({placeholders});",
                quote_identifier(table)
            )
        };

        self.with_connection(|conn| {
            conn.execute(&sql, params_from_iter(fields.values()))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Updates the row whose `key_column` equals `key`; returns rows changed.
    pub fn update(
        &self,
        table: &str,
        key_column: &str,
        key: &EntityKey,
        fields: &FieldMap,
    ) -> DbResult<usize> {
        let key_value = FieldValue::from(key);
        if fields.is_empty() {
            let matched = self.filter(table).where_eq(key_column, key_value).count()?;
            return Ok(usize::try_from(matched).unwrap_or(usize::MAX));
        }

        let assignments = fields
            .keys()
            .map(|column| format!("{} = ?", quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {} = ?;",
            quote_identifier(table),
            quote_identifier(key_column)
        );

        self.with_connection(|conn| {
            conn.execute(
                &sql,
                params_from_iter(fields.values().chain(iter::once(&key_value))),
            )
        })
    }

    /// Locks the connection slot, waiting out transactions owned by other
    /// threads.
    fn acquire(&self) -> DbResult<MutexGuard<'_, Slot>> {
        let me = thread::current().id();
        let slot = self.shared.slot.lock().map_err(|_| DbError::Poisoned)?;
        self.shared
            .released
            .wait_while(slot, |slot| slot.owner.is_some_and(|owner| owner != me))
            .map_err(|_| DbError::Poisoned)
    }
}

/// Releases the transaction reservation, rolling back work left open.
struct TransactionOwner<'a> {
    shared: &'a Shared,
}

impl Drop for TransactionOwner<'_> {
    fn drop(&mut self) {
        let mut slot = self
            .shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = slot.conn.as_ref().filter(|conn| !conn.is_autocommit()) {
            if let Err(err) = conn.execute_batch("ROLLBACK;") {
                error!("event=db_rollback module=db status=error error={err}");
            }
        }
        slot.owner = None;
        self.shared.released.notify_all();
    }
}

impl Debug for StoreHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("open", &self.is_open())
            .finish()
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    config: &StoreConfig,
    migrations: &[Migration],
) -> DbResult<()> {
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    apply_migrations(conn, migrations)?;
    Ok(())
}
