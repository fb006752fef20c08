//! Database layer for bookdl
//!
//! Handles SQLite persistence for book download records.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`records`]: Book download record CRUD and state transitions
//! - [`state`]: Runtime state (clean/unclean shutdown tracking)
//! - [`store`]: [`QueueStore`](crate::store::QueueStore) implementation

use crate::types::{BookDownloadRecord, ChapterRef, DownloadState, RecordId};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod migrations;
mod records;
mod state;
mod store;

/// Book download record as stored in SQLite
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    /// Unique database ID
    pub id: i64,
    /// Identifier in the originating catalog
    pub source_book_id: String,
    /// Identifier used for content lookups
    pub internal_book_id: String,
    /// Book title
    pub title: String,
    /// JSON-encoded chapter list
    pub chapter_list: String,
    /// Target output location
    pub file_path: String,
    /// Chapters written by the last successful download
    pub downloaded_chapter_count: i64,
    /// State code (see [`DownloadState::to_i32`])
    pub state: i32,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

impl From<RecordRow> for BookDownloadRecord {
    fn from(row: RecordRow) -> Self {
        // A damaged list loads as empty and is rejected by the download task
        let chapter_list: Vec<ChapterRef> = serde_json::from_str(&row.chapter_list)
            .unwrap_or_else(|e| {
                tracing::warn!(
                    record_id = row.id,
                    error = %e,
                    "Stored chapter list is not valid JSON"
                );
                Vec::new()
            });

        BookDownloadRecord {
            id: RecordId(row.id),
            source_book_id: row.source_book_id,
            internal_book_id: row.internal_book_id,
            title: row.title,
            chapter_list,
            file_path: PathBuf::from(row.file_path),
            downloaded_chapter_count: row.downloaded_chapter_count,
            state: DownloadState::from_i32(row.state),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Database handle for bookdl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
