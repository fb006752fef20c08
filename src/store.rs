//! Queue store contract consumed by the scheduler.
//!
//! The store is the single source of truth for record state. The scheduler
//! only ever talks to it through [`QueueStore`], so any durable backend can be
//! plugged in; [`Database`](crate::db::Database) is the SQLite implementation.

use crate::error::Result;
use crate::types::{BookDownloadRecord, DownloadState, RecordId};

/// Durable record storage keyed by record id.
///
/// Every call may block on I/O and may fail with a storage error. Callers treat
/// a failure as transient: the scheduler logs it and tries again next tick.
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync {
    /// Records currently `Pending`, oldest submission first, at most `limit`
    async fn get_pending(&self, limit: u32) -> Result<Vec<BookDownloadRecord>>;

    /// Persist a state change; illegal transitions are rejected
    async fn update_state(
        &self,
        id: RecordId,
        state: DownloadState,
        downloaded_chapters: Option<i64>,
    ) -> Result<()>;

    /// Look up a single record
    async fn get_by_id(&self, id: RecordId) -> Result<Option<BookDownloadRecord>>;

    /// Move every `Downloading` record to `Paused`, returning how many moved
    async fn pause_all_downloading(&self) -> Result<u64>;

    /// Called once when the scheduler starts. Returns true when the previous
    /// session ended without [`end_session`](Self::end_session).
    async fn begin_session(&self) -> Result<bool> {
        Ok(false)
    }

    /// Called once at the end of a graceful shutdown
    async fn end_session(&self) -> Result<()> {
        Ok(())
    }
}
