use super::*;
use crate::client::BookClient;
use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{DownloadError, Error, Result};
use crate::types::{BookDownloadRecord, ChapterRef, DownloadState, RecordId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// How the mock answers one locator
#[derive(Clone)]
enum Reply {
    Text(String, Duration),
    Fail(Duration),
    Gated(String, Arc<Notify>),
    FlakyThenText(usize, String),
}

#[derive(Default)]
struct MockClient {
    replies: HashMap<String, Reply>,
    calls: AtomicUsize,
    attempts: Mutex<HashMap<String, usize>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    completion_order: Mutex<Vec<String>>,
}

impl MockClient {
    fn new() -> Self {
        Self::default()
    }

    fn text(mut self, locator: &str, body: &str, delay_ms: u64) -> Self {
        self.replies.insert(
            locator.to_string(),
            Reply::Text(body.to_string(), Duration::from_millis(delay_ms)),
        );
        self
    }

    /// Answer `body` once `gate` is notified
    fn gated(mut self, locator: &str, body: &str, gate: &Arc<Notify>) -> Self {
        self.replies.insert(
            locator.to_string(),
            Reply::Gated(body.to_string(), gate.clone()),
        );
        self
    }

    fn fail(mut self, locator: &str, delay_ms: u64) -> Self {
        self.replies
            .insert(locator.to_string(), Reply::Fail(Duration::from_millis(delay_ms)));
        self
    }

    fn flaky(mut self, locator: &str, failures: usize, body: &str) -> Self {
        self.replies.insert(
            locator.to_string(),
            Reply::FlakyThenText(failures, body.to_string()),
        );
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookClient for MockClient {
    async fn fetch_chapter_content(
        &self,
        _internal_book_id: &str,
        content_locator: &str,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let reply = self.replies.get(content_locator).cloned();
        let result = match reply {
            Some(Reply::Text(body, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            Some(Reply::Gated(body, gate)) => {
                gate.notified().await;
                Ok(body)
            }
            Some(Reply::Fail(delay)) => {
                tokio::time::sleep(delay).await;
                Err(Error::Other(format!("{} unavailable", content_locator)))
            }
            Some(Reply::FlakyThenText(failures, body)) => {
                let attempt = {
                    let mut attempts = self.attempts.lock().unwrap();
                    let n = attempts.entry(content_locator.to_string()).or_default();
                    *n += 1;
                    *n
                };
                if attempt <= failures {
                    Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "reset",
                    )))
                } else {
                    Ok(body)
                }
            }
            None => Err(Error::NotFound(content_locator.to_string())),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completion_order
            .lock()
            .unwrap()
            .push(content_locator.to_string());
        result
    }
}

fn config(width: usize) -> DownloadConfig {
    DownloadConfig {
        chapter_concurrency: width,
        chapter_timeout: Duration::from_secs(5),
        retry: RetryConfig::disabled(),
    }
}

fn record(id: i64, chapters: Vec<ChapterRef>, file_path: PathBuf) -> BookDownloadRecord {
    BookDownloadRecord {
        id: RecordId(id),
        source_book_id: "src".into(),
        internal_book_id: "book".into(),
        title: "A Book".into(),
        chapter_list: chapters,
        file_path,
        downloaded_chapter_count: 0,
        state: DownloadState::Downloading,
        created_at: 0,
        updated_at: 0,
    }
}

fn chapter(index: i64) -> ChapterRef {
    ChapterRef::new(
        format!("c{index}"),
        format!("loc/{index}"),
        format!("Chapter {index}"),
        index,
    )
}

fn task(client: &Arc<MockClient>, width: usize) -> DownloadTask {
    DownloadTask::new(client.clone(), config(width))
}

/// Poll `done` until it holds, failing after five seconds
async fn until<F: Fn() -> bool>(done: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_chapters_merge_in_index_order_regardless_of_completion() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("book.txt");
    let gates: Vec<Arc<Notify>> = (0..3).map(|_| Arc::new(Notify::new())).collect();
    let client = Arc::new(
        MockClient::new()
            .gated("loc/0", "zero", &gates[0])
            .gated("loc/1", "one", &gates[1])
            .gated("loc/2", "two", &gates[2]),
    );
    let rec = record(1, vec![chapter(2), chapter(0), chapter(1)], out.clone());

    let download = task(&client, 5);
    let handle = tokio::spawn(async move { download.run(&rec).await });

    // Complete in order 1, 2, 0
    until(|| client.calls() == 3).await;
    for (released, index) in [1, 2, 0].into_iter().enumerate() {
        gates[index].notify_one();
        until(|| client.completion_order.lock().unwrap().len() == released + 1).await;
    }

    let outcome = handle.await.unwrap();
    assert!(outcome.success, "unexpected failure: {:?}", outcome.reason);
    assert_eq!(outcome.chapters_written, Some(3));
    assert_eq!(
        *client.completion_order.lock().unwrap(),
        vec!["loc/1", "loc/2", "loc/0"]
    );
    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written, "Chapter 0\nzero\n\nChapter 1\none\n\nChapter 2\ntwo");
}

#[tokio::test]
async fn test_non_contiguous_indexes_sort_numerically() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("book.txt");
    let client = Arc::new(
        MockClient::new()
            .text("loc/10", "ten", 0)
            .text("loc/2", "two", 0)
            .text("loc/-1", "prologue", 0),
    );
    let rec = record(1, vec![chapter(10), chapter(2), chapter(-1)], out.clone());

    assert!(task(&client, 2).run(&rec).await.success);

    let written = std::fs::read_to_string(&out).unwrap();
    let titles: Vec<_> = written
        .split("\n\n")
        .map(|block| block.lines().next().unwrap())
        .collect();
    assert_eq!(titles, vec!["Chapter -1", "Chapter 2", "Chapter 10"]);
}

#[tokio::test]
async fn test_single_chapter_failure_fails_book_without_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("book.txt");
    let client = Arc::new(
        MockClient::new()
            .text("loc/0", "zero", 0)
            .fail("loc/1", 20),
    );
    let rec = record(2, vec![chapter(0), chapter(1)], out.clone());

    let outcome = task(&client, 5).run(&rec).await;

    assert!(!outcome.success);
    assert_eq!(outcome.terminal_state(), DownloadState::Failed);
    let reason = outcome.reason.unwrap();
    assert!(reason.contains("c1"), "reason should name the chapter: {reason}");
    assert!(!out.exists());
    assert!(dir_entries(dir.path()).is_empty(), "no temp file may remain");
}

#[tokio::test]
async fn test_failure_cancels_chapters_not_yet_started() {
    let dir = TempDir::new().unwrap();
    let mut client = MockClient::new().fail("loc/0", 0);
    for i in 1..10 {
        client = client.text(&format!("loc/{i}"), "text", 0);
    }
    let client = Arc::new(client);
    let rec = record(
        3,
        (0..10).map(chapter).collect(),
        dir.path().join("book.txt"),
    );

    // One at a time: chapter 0 fails before any sibling starts
    let err = task(&client, 1).download(&rec).await.unwrap_err();

    assert!(matches!(err, DownloadError::ChapterFetch { index: 0, .. }));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_existing_output_short_circuits_without_fetching() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("done.txt");
    std::fs::write(&out, "already here").unwrap();
    let client = Arc::new(MockClient::new().text("loc/0", "zero", 0));
    let rec = record(3, vec![chapter(0)], out.clone());

    let task = task(&client, 5);
    let first = task.run(&rec).await;
    let second = task.run(&rec).await;

    assert!(first.success && second.success);
    assert_eq!(second.chapters_written, None);
    assert_eq!(client.calls(), 0);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "already here");
}

#[tokio::test]
async fn test_second_run_after_success_makes_no_calls() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("book.txt");
    let client = Arc::new(MockClient::new().text("loc/0", "zero", 0));
    let rec = record(4, vec![chapter(0)], out);
    let task = task(&client, 5);

    assert_eq!(task.run(&rec).await.chapters_written, Some(1));
    assert_eq!(client.calls(), 1);

    assert!(task.run(&rec).await.success);
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_empty_chapter_list_is_malformed() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(MockClient::new());
    let rec = record(5, Vec::new(), dir.path().join("book.txt"));

    let err = task(&client, 5).download(&rec).await.unwrap_err();

    assert!(matches!(err, DownloadError::MalformedRecord { id, .. } if id == RecordId(5)));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_chapter_without_index_is_rejected_before_io() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(MockClient::new().text("loc/0", "zero", 0));
    let mut broken = chapter(1);
    broken.index = None;
    let mut nameless = chapter(2);
    nameless.chapter_id = String::new();

    for bad in [broken, nameless] {
        let rec = record(6, vec![chapter(0), bad], dir.path().join("book.txt"));
        let outcome = task(&client, 5).run(&rec).await;
        assert!(!outcome.success);
        assert!(outcome.reason.unwrap().contains("malformed"));
    }
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_fan_out_respects_chapter_concurrency() {
    let dir = TempDir::new().unwrap();
    let mut client = MockClient::new();
    for i in 0..12 {
        client = client.text(&format!("loc/{i}"), "x", 20);
    }
    let client = Arc::new(client);
    let rec = record(
        7,
        (0..12).map(chapter).collect(),
        dir.path().join("book.txt"),
    );

    assert!(task(&client, 3).run(&rec).await.success);

    let peak = client.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded width");
    assert!(peak > 1, "fetches should overlap");
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("book.txt");
    let client = Arc::new(
        MockClient::new()
            .text("loc/0", "zero", 0)
            .flaky("loc/1", 2, "one"),
    );
    let rec = record(8, vec![chapter(0), chapter(1)], out.clone());

    let mut config = config(5);
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    let outcome = DownloadTask::new(client.clone(), config).run(&rec).await;

    assert!(outcome.success, "{:?}", outcome.reason);
    assert_eq!(client.calls(), 4);
    assert!(std::fs::read_to_string(&out).unwrap().ends_with("Chapter 1\none"));
}

#[tokio::test]
async fn test_slow_chapter_times_out() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(MockClient::new().text("loc/0", "zero", 500));
    let rec = record(9, vec![chapter(0)], dir.path().join("book.txt"));

    let mut config = config(5);
    config.chapter_timeout = Duration::from_millis(20);
    let err = DownloadTask::new(client, config)
        .download(&rec)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Timeout { ref chapter_id, .. } if chapter_id == "c0"));
}

#[tokio::test]
async fn test_cancelled_token_fails_book() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("book.txt");
    let client = Arc::new(MockClient::new().text("loc/0", "zero", 0));
    let rec = record(10, vec![chapter(0)], out.clone());

    let token = CancellationToken::new();
    token.cancel();
    let err = task(&client, 5)
        .with_cancel_token(token)
        .download(&rec)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Cancelled));
    assert_eq!(client.calls(), 0);
    assert!(!out.exists());
}

#[tokio::test]
async fn test_missing_parent_directories_are_created() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("nested/deeper/book.txt");
    let client = Arc::new(MockClient::new().text("loc/0", "zero", 0));
    let rec = record(11, vec![chapter(0)], out.clone());

    assert!(task(&client, 5).run(&rec).await.success);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "Chapter 0\nzero");
}

#[tokio::test]
async fn test_unwritable_target_is_merge_write_error() {
    let dir = TempDir::new().unwrap();
    // A regular file where a directory is needed
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "x").unwrap();
    let out = blocker.join("book.txt");
    let client = Arc::new(MockClient::new().text("loc/0", "zero", 0));
    let rec = record(12, vec![chapter(0)], out.clone());

    let err = task(&client, 5).download(&rec).await.unwrap_err();

    assert!(matches!(err, DownloadError::MergeWrite { ref path, .. } if *path == out));
    assert_eq!(client.calls(), 1);
}
