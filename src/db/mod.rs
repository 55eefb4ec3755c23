// src/db/mod.rs

//! Cache index database
//!
//! This module handles all SQLite operations for the cache index:
//! - Database initialization and schema creation
//! - Connection management with a bounded busy timeout
//! - Transaction handling
//! - CRUD operations for reference rows

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// How long a connection waits for another process's lock before failing
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(1);

/// Initialize the cache index at the specified path
///
/// Creates the database file, sets up pragmas and applies every pending
/// schema migration. This is idempotent - calling it on an existing database
/// is safe.
///
/// # Arguments
///
/// * `db_path` - Path where the database should be created
/// * `busy_timeout` - Maximum wait on a lock held by another process
///
/// # Returns
///
/// * `Result<Connection>` - Open connection to the migrated database
pub fn init(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    debug!("Initializing cache index at: {}", db_path.display());

    // Create parent directories if they don't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;

    // WAL lets readers in other processes proceed while one process writes
    conn.execute_batch(&format!(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = {};
        ",
        busy_timeout.as_millis()
    ))?;

    schema::migrate(&conn)?;

    info!("Cache index initialized at {}", db_path.display());
    Ok(conn)
}

/// Open an existing cache index
///
/// # Arguments
///
/// * `db_path` - Path to the database file
/// * `busy_timeout` - Maximum wait on a lock held by another process
///
/// # Returns
///
/// * `Result<Connection>` - Database connection if successful
pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if !db_path.exists() {
        return Err(Error::DatabaseNotFound(db_path.display().to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(&format!(
        "PRAGMA busy_timeout = {};",
        busy_timeout.as_millis()
    ))?;

    Ok(conn)
}

/// Run `f` inside an immediate transaction, committing on success
///
/// The write lock is taken up front so a competing process fails fast on
/// the busy timeout instead of deadlocking halfway through.
pub fn transaction<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// Whether an error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &Error) -> bool {
    matches!(
        err,
        Error::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
