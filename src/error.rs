//! Error types for the catalog.
//!
//! Resolution misses are not errors: they come back as `Option::None`.
//! These enums cover rejected input, integrity violations on write,
//! and storage failures.

use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid persisted data in {table}: {reason}")]
    InvalidData { table: &'static str, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced to callers of the catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("{kind} {id} is still referenced by {referenced_by}")]
    Protected {
        kind: &'static str,
        id: String,
        referenced_by: &'static str,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(value))
    }
}

impl CatalogError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
