//! Shared key-path store for invigil
//!
//! The store is the only channel between the admin controller and the
//! student clients. It is a hierarchical key-path document store with:
//! - Point reads and writes of JSON documents
//! - Per-document revisions for compare-and-swap writes
//! - Child listing (for code scans)
//! - Optional change notifications and server clock
//! - An append-only audit log

mod audit;
mod memory;
mod sqlite;
mod traits;

pub use audit::*;
pub use memory::*;
pub use sqlite::*;
pub use traits::*;

use invigil_util::InvigilError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store could not be reached; the next scheduled attempt may succeed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Create-if-absent write found an existing document
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Conditional write observed a different revision
    #[error("Revision mismatch at {path}: expected {expected:?}, found {actual:?}")]
    RevisionMismatch {
        path: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },
}

impl StoreError {
    /// Whether a conditional write lost a race against another writer
    pub fn is_write_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists(_) | StoreError::RevisionMismatch { .. }
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for InvigilError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists(_) | StoreError::RevisionMismatch { .. } => {
                InvigilError::Conflict(e.to_string())
            }
            StoreError::Serialization(_) => InvigilError::Internal(e.to_string()),
            StoreError::Database(_) | StoreError::Io(_) | StoreError::Unavailable(_) => {
                InvigilError::TransientStore(e.to_string())
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
