
use super::*;
use crate::config::{Config, RetryConfig};
use crate::error::{DatabaseError, Error};
use crate::types::{ChapterRef, DownloadState, Event, NewBookDownload};
use async_trait::async_trait;
use std::collections::HashSet as StdHashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::{Semaphore, broadcast};

fn storage_error() -> Error {
    Error::Database(DatabaseError::QueryFailed("database is locked".to_string()))
}

/// SQLite store with switchable storage failures
pub(super) struct TestStore {
    pub(super) db: Database,
    pub(super) fail_reads: AtomicBool,
    pub(super) fail_writes: AtomicBool,
}

#[async_trait]
impl QueueStore for TestStore {
    async fn get_pending(&self, limit: u32) -> crate::Result<Vec<BookDownloadRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(storage_error());
        }
        self.db.get_pending(limit).await
    }

    async fn update_state(
        &self,
        id: RecordId,
        state: DownloadState,
        downloaded_chapters: Option<i64>,
    ) -> crate::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(storage_error());
        }
        self.db.update_state(id, state, downloaded_chapters).await
    }

    async fn get_by_id(&self, id: RecordId) -> crate::Result<Option<BookDownloadRecord>> {
        self.db.get_record(id).await
    }

    async fn pause_all_downloading(&self) -> crate::Result<u64> {
        self.db.pause_all_downloading().await
    }

    async fn begin_session(&self) -> crate::Result<bool> {
        QueueStore::begin_session(&self.db).await
    }

    async fn end_session(&self) -> crate::Result<()> {
        QueueStore::end_session(&self.db).await
    }
}

/// Client answering `content of {locator}`, optionally held behind a gate
#[derive(Default)]
pub(super) struct TestClient {
    gate: Option<Semaphore>,
    failing_books: std::sync::Mutex<StdHashSet<String>>,
    pub(super) calls: AtomicUsize,
}

impl TestClient {
    pub(super) fn instant() -> Self {
        Self::default()
    }

    /// Every fetch waits until [`open`](Self::open) is called
    pub(super) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub(super) fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub(super) fn fail_book(&self, internal_book_id: &str) {
        self.failing_books
            .lock()
            .unwrap()
            .insert(internal_book_id.to_string());
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookClient for TestClient {
    async fn fetch_chapter_content(
        &self,
        internal_book_id: &str,
        content_locator: &str,
    ) -> crate::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            // Returned on drop, so one open() lets every fetch through in turn
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| Error::Other(e.to_string()))?;
        }
        if self.failing_books.lock().unwrap().contains(internal_book_id) {
            return Err(Error::Other(format!("{content_locator} unavailable")));
        }
        Ok(format!("content of {content_locator}"))
    }
}

pub(super) fn test_config(max_concurrent_books: usize) -> Config {
    let mut config = Config::default();
    // Long enough that only explicit ticks and cascades dispatch
    config.scheduler.tick_interval = Duration::from_secs(60);
    config.scheduler.max_concurrent_books = max_concurrent_books;
    config.scheduler.shutdown_timeout = Duration::from_secs(2);
    config.download.chapter_timeout = Duration::from_secs(5);
    config.download.retry = RetryConfig::disabled();
    config
}

pub(super) struct Fixture {
    pub(super) scheduler: Scheduler,
    pub(super) store: Arc<TestStore>,
    pub(super) client: Arc<TestClient>,
    pub(super) out_dir: TempDir,
    _db_file: NamedTempFile,
}

pub(super) async fn fixture(config: Config, client: TestClient) -> Fixture {
    let db_file = NamedTempFile::new().unwrap();
    let db = Database::new(db_file.path()).await.unwrap();
    let store = Arc::new(TestStore {
        db,
        fail_reads: AtomicBool::new(false),
        fail_writes: AtomicBool::new(false),
    });
    let client = Arc::new(client);
    let scheduler = Scheduler::new(store.clone(), client.clone(), config).unwrap();

    Fixture {
        scheduler,
        store,
        client,
        out_dir: TempDir::new().unwrap(),
        _db_file: db_file,
    }
}

impl Fixture {
    /// Queue a two-chapter book written to `{out_dir}/{name}.txt`
    pub(super) async fn add_book(&self, name: &str) -> RecordId {
        let new = NewBookDownload {
            source_book_id: format!("src-{name}"),
            internal_book_id: name.to_string(),
            title: format!("Book {name}"),
            chapter_list: vec![
                ChapterRef::new("c1", format!("{name}/1"), "One", 1),
                ChapterRef::new("c0", format!("{name}/0"), "Zero", 0),
            ],
            file_path: self.output(name),
        };
        self.store.db.add_or_update_record(&new).await.unwrap()
    }

    pub(super) fn output(&self, name: &str) -> std::path::PathBuf {
        self.out_dir.path().join(format!("{name}.txt"))
    }

    pub(super) async fn state_of(&self, id: RecordId) -> DownloadState {
        self.store.db.get_record(id).await.unwrap().unwrap().state
    }

    pub(super) async fn count(&self, state: DownloadState) -> i64 {
        self.store.db.count_by_state(state).await.unwrap()
    }
}

/// Wait for the first event matching `pred`
pub(super) async fn wait_for<F>(events: &mut broadcast::Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
