//! Durable storage for captured visit records.

mod visits;

pub use visits::{VisitStore, SCHEMA_VERSION, SEARCH_RESULT_LIMIT};

use thiserror::Error;

/// Errors from the visit store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
