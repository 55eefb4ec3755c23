// src/error.rs

use crate::graph::GraphError;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types for the resolver and cache
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Reference is not present in the cache index
    #[error("No entry for reference '{0}'")]
    NotFound(String),

    /// Reference is already present in the cache index
    #[error("Reference '{0}' already exists")]
    AlreadyExists(String),

    /// Index and filesystem disagree about an entry
    #[error("Cache corruption for '{reference}': folder {} does not exist", .path.display())]
    CacheCorruption { reference: String, path: PathBuf },

    /// A cache folder could not be removed or replaced
    #[error(
        "{}\n\nFolder: {source}\nCouldn't remove folder, might be busy or open\nClose any app using it, and retry",
        .path.display()
    )]
    FilesystemBusy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Advisory lock held by another process for too long
    #[error("Timed out waiting for lock {} ({description})", .path.display())]
    LockTimeout { path: PathBuf, description: String },

    /// Malformed reference text or invalid reference field
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Malformed version range expression
    #[error("Invalid version range '{0}'")]
    InvalidVersionRange(String),

    /// A recipe collaborator failed to provide a recipe
    #[error("Recipe error: {0}")]
    Recipe(String),

    /// Dependency graph resolution failure
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl Error {
    /// Whether retrying the same operation later may succeed
    ///
    /// True for index writes that gave up waiting on another process's lock.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Error::LockTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
