// src/db/schema.rs

//! Database schema definitions and migrations for the cache index
//!
//! This module defines the SQLite schema for the references table and
//! provides a migration system to evolve the schema over time.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema is up to date");
        return Ok(());
    }

    // Apply migrations in order
    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(crate::error::Error::InitError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// Creates the references table. Every cached recipe revision and package
/// revision owns exactly one row:
/// - `reference`: full canonical string, unique
/// - `recipe`: `name/version[@user/channel]` used to group revisions
/// - `rrev` / `pkgid` / `prev`: revision coordinates, NULL where not applicable
/// - `path`: folder relative to the cache root, unique
/// - `timestamp`: seconds since the epoch, 0 for temporary entries
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE refs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reference TEXT NOT NULL UNIQUE,
            recipe TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            user TEXT,
            channel TEXT,
            rrev TEXT NOT NULL,
            pkgid TEXT,
            prev TEXT,
            path TEXT NOT NULL UNIQUE,
            timestamp REAL NOT NULL,
            remote TEXT,
            CHECK (pkgid IS NOT NULL OR prev IS NULL)
        );

        CREATE INDEX idx_refs_recipe ON refs(recipe);
        CREATE INDEX idx_refs_name ON refs(name);
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Track which build produced an entry
///
/// Adds build_id so recipe layouts can remember the package id that was
/// used as the build folder for the whole graph
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        ALTER TABLE refs ADD COLUMN build_id TEXT;
        CREATE INDEX idx_refs_timestamp ON refs(timestamp);
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}
