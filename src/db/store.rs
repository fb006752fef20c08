//! [`QueueStore`] implementation backed by SQLite.

use crate::Result;
use crate::store::QueueStore;
use crate::types::{BookDownloadRecord, DownloadState, RecordId};

use super::Database;

#[async_trait::async_trait]
impl QueueStore for Database {
    async fn get_pending(&self, limit: u32) -> Result<Vec<BookDownloadRecord>> {
        Database::get_pending(self, limit).await
    }

    async fn update_state(
        &self,
        id: RecordId,
        state: DownloadState,
        downloaded_chapters: Option<i64>,
    ) -> Result<()> {
        Database::update_state(self, id, state, downloaded_chapters).await
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<BookDownloadRecord>> {
        self.get_record(id).await
    }

    async fn pause_all_downloading(&self) -> Result<u64> {
        Database::pause_all_downloading(self).await
    }

    async fn begin_session(&self) -> Result<bool> {
        let unclean = self.was_unclean_shutdown().await?;
        if unclean {
            let stuck = self.count_by_state(DownloadState::Downloading).await?;
            if stuck > 0 {
                tracing::warn!(
                    stuck_records = stuck,
                    "Previous session ended uncleanly, downloading records need an explicit reset"
                );
            }
        }
        self.set_clean_start().await?;
        Ok(unclean)
    }

    async fn end_session(&self) -> Result<()> {
        self.set_clean_shutdown().await
    }
}
