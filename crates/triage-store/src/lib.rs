//! SQLite persistence for the triage core.
//!
//! All cross-invocation coordination happens here. Every unit of work runs
//! inside a `BEGIN IMMEDIATE` transaction on its own pooled connection, so
//! writers are serialized by SQLite and a contended write surfaces as
//! [`TriageError::Conflict`] instead of being papered over in process.

mod blame;
mod bugs;
mod deploys;
mod events;
mod occurrences;
mod projects;
mod schema;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};
use triage_error::{Result, TriageError};

pub use events::EventRecord;
pub use projects::NewProject;
pub use schema::SCHEMA_VERSION;

/// Connection-level knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a writer waits for the lock before reporting a conflict.
    pub busy_timeout: Duration,
    /// Idle connections kept for reuse.
    pub pool_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            pool_size: 8,
        }
    }
}

struct DatabaseInner {
    path: PathBuf,
    options: StoreOptions,
    idle: Mutex<Vec<Connection>>,
}

/// Handle to a triage database file. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("options", &self.inner.options)
            .field("idle", &self.inner.idle.lock().len())
            .finish()
    }
}

impl Database {
    /// Open (creating if needed) and migrate the database at `path`.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection(&path, options)?;
        schema::migrate(&conn)?;
        info!(path = %path.display(), schema_version = SCHEMA_VERSION, "triage store opened");
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                path,
                options,
                idle: Mutex::new(vec![conn]),
            }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Check out a connection, opening a new one when the pool is empty.
    pub fn connect(&self) -> Result<PooledConn> {
        let reused = self.inner.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(path = %self.inner.path.display(), "opening pooled connection");
                open_connection(&self.inner.path, self.inner.options)?
            }
        };
        Ok(PooledConn {
            conn: Some(conn),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Run `work` in a write transaction on a pooled connection.
    pub fn immediate<T>(&self, work: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        self.connect()?.immediate(work)
    }

    /// Run `work` in a read transaction on a pooled connection.
    pub fn read<T>(&self, work: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        self.connect()?.run(TransactionBehavior::Deferred, work)
    }
}

fn open_connection(path: &Path, options: StoreOptions) -> Result<Connection> {
    let conn = Connection::open(path).map_err(map_sqlite_error)?;
    conn.busy_timeout(options.busy_timeout)
        .map_err(map_sqlite_error)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;\
         PRAGMA synchronous=NORMAL;\
         PRAGMA foreign_keys=ON;",
    )
    .map_err(map_sqlite_error)?;
    Ok(conn)
}

/// A connection borrowed from a [`Database`] pool; returned on drop.
pub struct PooledConn {
    conn: Option<Connection>,
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

impl PooledConn {
    /// Run `work` inside `BEGIN IMMEDIATE ... COMMIT`. Any error rolls back.
    pub fn immediate<T>(&mut self, work: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        self.run(TransactionBehavior::Immediate, work)
    }

    fn run<T>(
        &mut self,
        behavior: TransactionBehavior,
        work: impl FnOnce(&Tx<'_>) -> Result<T>,
    ) -> Result<T> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| TriageError::Internal("pooled connection already released".into()))?;
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(map_sqlite_error)?;
        let scoped = Tx { tx };
        let value = work(&scoped)?;
        scoped.tx.commit().map_err(map_sqlite_error)?;
        Ok(value)
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut idle = self.inner.idle.lock();
            if idle.len() < self.inner.options.pool_size {
                idle.push(conn);
            }
        }
    }
}

/// An open transaction. Query methods live in the per-table modules.
pub struct Tx<'c> {
    tx: Transaction<'c>,
}

impl fmt::Debug for Tx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx").finish_non_exhaustive()
    }
}

/// Busy/locked databases are transient conflicts; everything else is a
/// storage failure.
pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> TriageError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            TriageError::conflict(err.to_string())
        }
        _ => TriageError::storage(err.to_string()),
    }
}

/// Only UNIQUE/PRIMARY KEY collisions; foreign-key and CHECK failures are
/// not races and must not be retried.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            )
    )
}

pub(crate) fn to_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string(value).map_err(|err| TriageError::Serialization(err.to_string()))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|err| TriageError::Serialization(err.to_string()))
}
