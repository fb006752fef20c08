//! Book download record CRUD and state transitions.

use crate::error::{DatabaseError, DownloadError};
use crate::types::{BookDownloadRecord, DownloadState, NewBookDownload, RecordId};
use crate::{Error, Result};

use super::{Database, RecordRow};

const RECORD_COLUMNS: &str = "id, source_book_id, internal_book_id, title, chapter_list, \
     file_path, downloaded_chapter_count, state, created_at, updated_at";

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl Database {
    /// Insert a download request, or merge it into the existing record for the
    /// same (`internal_book_id`, `file_path`) pair.
    ///
    /// A merged record gets the new title, source id and chapter list and goes
    /// back to `Pending`, with two exceptions: a `Downloading` record keeps its
    /// state and chapter count, and a `Completed` record is left untouched so
    /// it keeps describing the file already on disk.
    pub async fn add_or_update_record(&self, new: &NewBookDownload) -> Result<RecordId> {
        let now = chrono::Utc::now().timestamp();
        let chapter_list = serde_json::to_string(&new.chapter_list)?;
        let file_path = new.file_path.to_string_lossy().into_owned();
        let downloading = DownloadState::Downloading.to_i32();

        let upserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO book_download_records (
                source_book_id, internal_book_id, title, chapter_list, file_path,
                downloaded_chapter_count, state, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
            ON CONFLICT(internal_book_id, file_path) DO UPDATE SET
                source_book_id = excluded.source_book_id,
                title = excluded.title,
                chapter_list = excluded.chapter_list,
                updated_at = excluded.updated_at,
                downloaded_chapter_count = CASE
                    WHEN book_download_records.state = ?
                        THEN book_download_records.downloaded_chapter_count
                    ELSE 0 END,
                state = CASE
                    WHEN book_download_records.state = ? THEN book_download_records.state
                    ELSE excluded.state END
            WHERE book_download_records.state != ?
            RETURNING id
            "#,
        )
        .bind(&new.source_book_id)
        .bind(&new.internal_book_id)
        .bind(&new.title)
        .bind(&chapter_list)
        .bind(&file_path)
        .bind(DownloadState::Pending.to_i32())
        .bind(now)
        .bind(now)
        .bind(downloading)
        .bind(downloading)
        .bind(DownloadState::Completed.to_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to add or update record: {}",
                e
            )))
        })?;

        if let Some(id) = upserted {
            return Ok(RecordId(id));
        }

        // Conflict with a completed record: nothing was written
        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM book_download_records WHERE internal_book_id = ? AND file_path = ?",
        )
        .bind(&new.internal_book_id)
        .bind(&file_path)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to look up completed record: {}",
                e
            )))
        })?;

        tracing::debug!(
            record_id = id,
            book_id = %new.internal_book_id,
            "Book already downloaded, request ignored"
        );
        Ok(RecordId(id))
    }

    /// Get a record by ID
    pub async fn get_record(&self, id: RecordId) -> Result<Option<BookDownloadRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM book_download_records WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get record: {}",
                e
            )))
        })?;

        Ok(row.map(BookDownloadRecord::from))
    }

    /// List all records, newest first
    pub async fn list_records(&self) -> Result<Vec<BookDownloadRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM book_download_records ORDER BY created_at DESC, id DESC",
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list records: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(BookDownloadRecord::from).collect())
    }

    /// List the most recent records, newest first
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<BookDownloadRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM book_download_records ORDER BY created_at DESC, id DESC LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list recent records: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(BookDownloadRecord::from).collect())
    }

    /// List records in any of `states`
    ///
    /// Records are grouped by the position of their state in `states`, oldest
    /// first within a group.
    pub async fn list_by_states(
        &self,
        states: &[DownloadState],
    ) -> Result<Vec<BookDownloadRecord>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let order_case: String = states
            .iter()
            .enumerate()
            .map(|(position, state)| format!(" WHEN {} THEN {}", state.to_i32(), position))
            .collect();
        let sql = format!(
            "SELECT {} FROM book_download_records WHERE state IN ({}) \
             ORDER BY CASE state{} END ASC, created_at ASC, id ASC",
            RECORD_COLUMNS,
            placeholders(states.len()),
            order_case
        );

        let mut query = sqlx::query_as::<_, RecordRow>(&sql);
        for state in states {
            query = query.bind(state.to_i32());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list records by state: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(BookDownloadRecord::from).collect())
    }

    /// Oldest `Pending` records, up to `limit`
    pub async fn get_pending(&self, limit: u32) -> Result<Vec<BookDownloadRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM book_download_records WHERE state = ? \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(DownloadState::Pending.to_i32())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get pending records: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(BookDownloadRecord::from).collect())
    }

    /// Count records in a state
    pub async fn count_by_state(&self, state: DownloadState) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM book_download_records WHERE state = ?")
                .bind(state.to_i32())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count records: {}",
                        e
                    )))
                })?;

        Ok(count)
    }

    /// Move a record to `state`, optionally recording the downloaded chapter count
    ///
    /// The update only applies when the current state may legally move to
    /// `state` (see [`DownloadState::can_transition_to`]); otherwise it fails
    /// with [`DownloadError::InvalidTransition`] and nothing changes.
    pub async fn update_state(
        &self,
        id: RecordId,
        state: DownloadState,
        downloaded_chapters: Option<i64>,
    ) -> Result<()> {
        let allowed = DownloadState::predecessors(state);
        if allowed.is_empty() {
            return self.reject_transition(id, state).await;
        }

        let now = chrono::Utc::now().timestamp();
        let sql = format!(
            "UPDATE book_download_records SET state = ?, updated_at = ?, \
             downloaded_chapter_count = COALESCE(?, downloaded_chapter_count) \
             WHERE id = ? AND state IN ({})",
            placeholders(allowed.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(state.to_i32())
            .bind(now)
            .bind(downloaded_chapters)
            .bind(id);
        for from in &allowed {
            query = query.bind(from.to_i32());
        }

        let result = query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update state: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return self.reject_transition(id, state).await;
        }

        Ok(())
    }

    /// Work out why a state update matched no row.
    async fn reject_transition(&self, id: RecordId, to: DownloadState) -> Result<()> {
        match self.get_record(id).await? {
            Some(record) => Err(Error::Download(DownloadError::InvalidTransition {
                id,
                from: record.state,
                to,
            })),
            None => Err(Error::NotFound(format!("record {}", id))),
        }
    }

    /// Move every `Downloading` record to `Paused`, returning how many moved
    pub async fn pause_all_downloading(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE book_download_records SET state = ?, updated_at = ? WHERE state = ?",
        )
        .bind(DownloadState::Paused.to_i32())
        .bind(now)
        .bind(DownloadState::Downloading.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to pause downloading records: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Put a `Failed` or `Paused` record back in the queue
    ///
    /// This is the only way out of either state; the scheduler never calls it.
    pub async fn reset_to_pending(&self, id: RecordId) -> Result<()> {
        self.update_state(id, DownloadState::Pending, None).await
    }

    /// Delete a record, returning whether it existed
    pub async fn delete_record(&self, id: RecordId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM book_download_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete record: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every `Pending` and `Downloading` record, returning how many were removed
    pub async fn clear_unfinished(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM book_download_records WHERE state = ? OR state = ?")
                .bind(DownloadState::Pending.to_i32())
                .bind(DownloadState::Downloading.to_i32())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to clear unfinished records: {}",
                        e
                    )))
                })?;

        Ok(result.rows_affected())
    }
}
