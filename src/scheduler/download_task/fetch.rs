//! Concurrent chapter fetching.

use crate::error::DownloadError;
use crate::retry::fetch_with_retry;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::context::{ChapterJob, DownloadTask};

/// A chapter whose content arrived
#[derive(Clone, Debug)]
pub(super) struct FetchedChapter {
    pub(super) position: usize,
    pub(super) index: i64,
    pub(super) title: String,
    pub(super) content: String,
}

/// Fetch every chapter, at most `chapter_concurrency` at a time
///
/// The first failure cancels every job that has not started yet. Jobs already
/// running are allowed to settle and their results are dropped. Returns the
/// first failure, or [`DownloadError::Cancelled`] when the outer token stopped
/// the book.
pub(super) async fn fetch_chapters(
    task: &DownloadTask,
    internal_book_id: &str,
    jobs: Vec<ChapterJob>,
) -> Result<Vec<FetchedChapter>, DownloadError> {
    let total = jobs.len();
    let cancel_token = task.cancel_token.child_token();
    let width = task.config.chapter_concurrency.max(1);

    let mut results = stream::iter(jobs)
        .map(|job| {
            let cancel_token = cancel_token.clone();
            async move { fetch_chapter(task, internal_book_id, job, cancel_token).await }
        })
        .buffer_unordered(width);

    let mut fetched = Vec::with_capacity(total);
    let mut first_error: Option<DownloadError> = None;
    let mut cancelled = false;

    while let Some(result) = results.next().await {
        match result {
            Ok(chapter) if first_error.is_none() => {
                tracing::debug!(
                    book_id = internal_book_id,
                    chapter_index = chapter.index,
                    done = fetched.len() + 1,
                    total,
                    "Chapter fetched"
                );
                fetched.push(chapter);
            }
            // Settled after a sibling failed; discarded
            Ok(_) => {}
            Err(DownloadError::Cancelled) => cancelled = true,
            Err(e) => {
                if first_error.is_none() {
                    tracing::debug!(
                        book_id = internal_book_id,
                        error = %e,
                        "Chapter failed, cancelling remaining fetches"
                    );
                    cancel_token.cancel();
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if cancelled || fetched.len() != total {
        return Err(DownloadError::Cancelled);
    }
    Ok(fetched)
}

async fn fetch_chapter(
    task: &DownloadTask,
    internal_book_id: &str,
    job: ChapterJob,
    cancel_token: CancellationToken,
) -> Result<FetchedChapter, DownloadError> {
    if cancel_token.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    let client = &task.client;
    let locator = job.content_locator.as_str();
    let fetch = fetch_with_retry(&task.config.retry, || {
        client.fetch_chapter_content(internal_book_id, locator)
    });

    match tokio::time::timeout(task.config.chapter_timeout, fetch).await {
        Ok(Ok(content)) => Ok(FetchedChapter {
            position: job.position,
            index: job.index,
            title: job.title,
            content,
        }),
        Ok(Err(e)) => Err(DownloadError::ChapterFetch {
            chapter_id: job.chapter_id,
            index: job.index,
            message: e.to_string(),
        }),
        Err(_) => Err(DownloadError::Timeout {
            chapter_id: job.chapter_id,
            after: task.config.chapter_timeout,
        }),
    }
}
