//! Download task orchestration: top-level lifecycle for a single book.

use crate::error::DownloadError;
use crate::types::{BookDownloadRecord, TaskOutcome};

use super::context::{DownloadTask, plan_jobs};
use super::fetch::fetch_chapters;
use super::merge::{render_book, write_atomically};

impl DownloadTask {
    /// Download `record` and report the outcome
    ///
    /// Never panics on bad input and never returns an error: every failure is
    /// folded into a failed [`TaskOutcome`] carrying the reason.
    pub async fn run(&self, record: &BookDownloadRecord) -> TaskOutcome {
        match self.download(record).await {
            Ok(chapters_written) => TaskOutcome::succeeded(chapters_written),
            Err(e) => {
                tracing::warn!(
                    record_id = record.id.0,
                    book_id = %record.internal_book_id,
                    error = %e,
                    "Book download failed"
                );
                TaskOutcome::failed(e.to_string())
            }
        }
    }

    /// Download `record`, returning the number of chapters written
    ///
    /// Phases:
    /// 1. Short-circuit when the output file already exists (`Ok(None)`)
    /// 2. Validate the chapter list
    /// 3. Fetch all chapters concurrently; one failure fails the book
    /// 4. Merge by index and write the file atomically
    pub async fn download(
        &self,
        record: &BookDownloadRecord,
    ) -> Result<Option<usize>, DownloadError> {
        // Phase 1: idempotence
        if tokio::fs::try_exists(&record.file_path)
            .await
            .unwrap_or(false)
        {
            tracing::info!(
                record_id = record.id.0,
                path = %record.file_path.display(),
                "Output already exists, skipping download"
            );
            return Ok(None);
        }

        // Phase 2: pre-flight
        let jobs = plan_jobs(record)?;
        let chapter_count = jobs.len();
        tracing::info!(
            record_id = record.id.0,
            book_id = %record.internal_book_id,
            chapters = chapter_count,
            "Downloading book"
        );

        // Phase 3: fan-out
        let chapters = fetch_chapters(self, &record.internal_book_id, jobs).await?;

        // Phase 4: merge and commit
        let contents = render_book(chapters);
        write_atomically(&record.file_path, &contents).await?;

        tracing::info!(
            record_id = record.id.0,
            path = %record.file_path.display(),
            chapters = chapter_count,
            "Book written"
        );
        Ok(Some(chapter_count))
    }
}
