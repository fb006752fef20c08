//! Error types for bookdl
//!
//! This module provides the error taxonomy of the download pipeline:
//! - [`DatabaseError`] - the queue store is unreachable or returned something unusable
//! - [`DownloadError`] - a single book download failed (bad record, chapter fetch, final write)
//! - [`Error`] - the top-level error returned by public APIs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{DownloadState, RecordId};

/// Result type alias for bookdl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bookdl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_books")
        key: Option<String>,
    },

    /// Queue store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Book download error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Shutdown in progress
    #[error("shutdown in progress: scheduler is not accepting work")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error originates from the queue store.
    ///
    /// Storage failures abort the current scheduler tick; everything else is
    /// attributed to the record being processed.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Sqlx(_))
    }
}

/// Queue store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Errors surfaced by a single book download
///
/// Every variant ends the book in [`DownloadState::Failed`]; the variant only
/// decides the diagnostic text attached to the failure.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The record cannot be downloaded as stored (empty list, missing chapter fields)
    #[error("record {id} is malformed: {reason}")]
    MalformedRecord {
        /// Record that failed validation
        id: RecordId,
        /// What is wrong with it
        reason: String,
    },

    /// Fetching one chapter's content failed
    #[error("chapter {chapter_id} (index {index}) fetch failed: {message}")]
    ChapterFetch {
        /// Chapter identifier from the chapter list
        chapter_id: String,
        /// Ordering key of the chapter
        index: i64,
        /// Underlying failure
        message: String,
    },

    /// A chapter fetch did not settle within the configured timeout
    #[error("chapter {chapter_id} fetch timed out after {after:?}")]
    Timeout {
        /// Chapter identifier from the chapter list
        chapter_id: String,
        /// The timeout that elapsed
        after: Duration,
    },

    /// Writing the merged book failed
    #[error("failed to write {path}: {message}")]
    MergeWrite {
        /// Target output path
        path: PathBuf,
        /// Underlying I/O failure
        message: String,
    },

    /// The requested state change is not in the transition table
    #[error("record {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Record whose state change was rejected
        id: RecordId,
        /// Current persisted state
        from: DownloadState,
        /// Requested state
        to: DownloadState,
    },

    /// The fetch was skipped because a sibling chapter already failed
    #[error("cancelled after an earlier chapter failure")]
    Cancelled,
}
