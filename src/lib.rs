//! # bookdl
//!
//! Background download pipeline for books stored chapter by chapter.
//!
//! ## Overview
//!
//! - A durable queue of [`BookDownloadRecord`](types::BookDownloadRecord)s
//!   lives in SQLite ([`Database`]) behind the [`QueueStore`] trait.
//! - A polling [`Scheduler`] rebuilds its in-memory queue from the store on
//!   every tick and runs at most `max_concurrent_books` downloads at a time.
//! - Each [`DownloadTask`] fetches a book's chapters concurrently through a
//!   [`BookClient`], merges them by chapter index and writes the book in one
//!   atomic step. One failed chapter fails the whole book; no partial file is
//!   ever left behind.
//! - Every state change is persisted before observers are told about it
//!   through the [`EventNotifier`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use bookdl::{Config, Database, NewBookDownload, Scheduler};
//! use bookdl::types::ChapterRef;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.client.base_url = Some("https://blobs.example.com/chapters".into());
//!
//!     let db = Database::new(&config.persistence.database_path).await?;
//!     db.add_or_update_record(&NewBookDownload {
//!         source_book_id: "qd-881".into(),
//!         internal_book_id: "b7f3".into(),
//!         title: "The Long Road".into(),
//!         chapter_list: vec![
//!             ChapterRef::new("c1", "b7f3/1.txt", "Chapter 1", 1),
//!             ChapterRef::new("c2", "b7f3/2.txt", "Chapter 2", 2),
//!         ],
//!         file_path: "downloads/qd-881_1_b7f3.txt".into(),
//!     })
//!     .await?;
//!     db.close().await;
//!
//!     let scheduler = Scheduler::from_config(config).await?;
//!     let mut events = scheduler.notifier().events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     bookdl::run_with_shutdown(scheduler).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Chapter content access
pub mod client;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Lifecycle event fan-out
pub mod notifier;
/// Retry logic with exponential backoff
pub mod retry;
/// Book-level scheduling and per-book download tasks
pub mod scheduler;
/// Queue store contract
pub mod store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use client::{BookClient, HttpBookClient};
pub use config::Config;
pub use db::Database;
pub use error::{DatabaseError, DownloadError, Error, Result};
pub use notifier::{EventNotifier, SubscriptionId};
pub use scheduler::{DownloadTask, Scheduler};
pub use store::QueueStore;
pub use types::{
    BookDownloadRecord, ChapterRef, DownloadState, Event, EventKind, NewBookDownload, RecordId,
    TaskOutcome,
};

/// Start `scheduler`, wait for a termination signal, then shut it down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if the
///   handlers cannot be registered.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(scheduler: Scheduler) -> Result<()> {
    scheduler.start().await?;
    wait_for_signal().await;
    scheduler.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register every signal handler");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(
                error = %e,
                "Could not register signal handlers, using ctrl_c fallback"
            );
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
