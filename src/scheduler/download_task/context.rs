//! Download task handle and pre-flight validation.

use crate::client::BookClient;
use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::types::BookDownloadRecord;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Turns one [`BookDownloadRecord`] into a written file or a clean failure
///
/// The task never touches the queue store. It reports a
/// [`TaskOutcome`](crate::types::TaskOutcome) and leaves state changes to the
/// caller.
#[derive(Clone)]
pub struct DownloadTask {
    pub(super) client: Arc<dyn BookClient>,
    pub(super) config: DownloadConfig,
    pub(super) cancel_token: CancellationToken,
}

impl DownloadTask {
    /// Create a task that fetches through `client`
    pub fn new(client: Arc<dyn BookClient>, config: DownloadConfig) -> Self {
        Self {
            client,
            config,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Tie the task to an outer token
    ///
    /// Cancelling `token` stops chapter fetches that have not started yet and
    /// fails the book.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }
}

/// A chapter that passed validation, ready to be fetched
#[derive(Clone, Debug)]
pub(super) struct ChapterJob {
    /// Position in the record's chapter list; breaks ties between equal indexes
    pub(super) position: usize,
    pub(super) chapter_id: String,
    pub(super) index: i64,
    pub(super) title: String,
    pub(super) content_locator: String,
}

/// Check the chapter list before any I/O
pub(super) fn plan_jobs(record: &BookDownloadRecord) -> Result<Vec<ChapterJob>, DownloadError> {
    if record.chapter_list.is_empty() {
        return Err(DownloadError::MalformedRecord {
            id: record.id,
            reason: "chapter list is empty".to_string(),
        });
    }

    record
        .chapter_list
        .iter()
        .enumerate()
        .map(|(position, chapter)| -> Result<ChapterJob, DownloadError> {
            let index = chapter
                .validate(position)
                .map_err(|reason| DownloadError::MalformedRecord {
                    id: record.id,
                    reason,
                })?;
            Ok(ChapterJob {
                position,
                chapter_id: chapter.chapter_id.clone(),
                index,
                title: chapter.title.clone(),
                content_locator: chapter.content_locator.clone(),
            })
        })
        .collect()
}
