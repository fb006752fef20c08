//! Book-level scheduling.
//!
//! The [`Scheduler`] keeps an in-memory queue in step with the durable
//! [`QueueStore`] and runs at most `max_concurrent_books` [`DownloadTask`]s at
//! a time. Work happens on a single control loop:
//!
//! - every `tick_interval` the loop runs a [tick](Scheduler::tick): rebuild
//!   the queue from the store's `Pending` records, then dispatch one record
//!   per free slot
//! - every finished task is reported back to the loop, which persists the
//!   terminal state, notifies observers and immediately ticks again
//!
//! Submodules:
//! - [`queue`] - Refill, deduplication and dispatch
//! - [`completion`] - Persisting task outcomes
//! - [`lifecycle`] - Start, stop, pause and shutdown
//! - [`download_task`] - Executing a single book

use crate::client::{BookClient, HttpBookClient};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::notifier::EventNotifier;
use crate::store::QueueStore;
use crate::types::{BookDownloadRecord, RecordId, TaskOutcome};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

mod completion;
pub mod download_task;
mod lifecycle;
mod queue;

pub use download_task::DownloadTask;

/// A finished task waiting to be persisted by the control loop
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) record: BookDownloadRecord,
    pub(crate) outcome: TaskOutcome,
}

/// Scheduler-local state, guarded by one lock so ticks never overlap
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    /// Pending records waiting for a free slot, oldest first
    pub(crate) queue: VecDeque<BookDownloadRecord>,
    /// Records dispatched and not yet settled; never persisted
    pub(crate) in_flight: HashSet<RecordId>,
    /// Finished tasks whose terminal state could not be stored yet
    pub(crate) unsettled: Vec<Completion>,
}

/// Polling scheduler over a [`QueueStore`]
///
/// Cloning is cheap; clones share the queue, the in-flight set and the
/// running tasks.
///
/// # Example
///
/// ```no_run
/// use bookdl::{Config, Scheduler};
/// use bookdl::types::EventKind;
///
/// # async fn example() -> bookdl::Result<()> {
/// let mut config = Config::default();
/// config.client.base_url = Some("https://blobs.example.com/chapters".into());
///
/// let scheduler = Scheduler::from_config(config).await?;
/// scheduler.notifier().subscribe(EventKind::Completed, |event| {
///     println!("finished: {:?}", event);
/// });
/// scheduler.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) client: Arc<dyn BookClient>,
    pub(crate) notifier: EventNotifier,
    pub(crate) config: Arc<Config>,
    pub(crate) state: Arc<Mutex<QueueState>>,
    pub(crate) completion_tx: mpsc::UnboundedSender<Completion>,
    pub(crate) completion_rx: Arc<Mutex<mpsc::UnboundedReceiver<Completion>>>,
    /// Running download tasks
    pub(crate) tasks: TaskTracker,
    /// Stops the timer; the control loop then drains outstanding tasks
    pub(crate) stop_token: CancellationToken,
    /// Parent of every task's token; cancels chapter fetches not yet started
    pub(crate) task_token: CancellationToken,
    pub(crate) control: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl Scheduler {
    /// Create a scheduler over `store`, fetching through `client`
    pub fn new(
        store: Arc<dyn QueueStore>,
        client: Arc<dyn BookClient>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            store,
            client,
            notifier: EventNotifier::default(),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(QueueState::default())),
            completion_tx,
            completion_rx: Arc::new(Mutex::new(completion_rx)),
            tasks: TaskTracker::new(),
            stop_token: CancellationToken::new(),
            task_token: CancellationToken::new(),
            control: Arc::new(Mutex::new(None)),
        })
    }

    /// Open the SQLite store at `persistence.database_path` and an
    /// [`HttpBookClient`] for `client.base_url`
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let client = HttpBookClient::from_config(&config.client)?;
        let db = Database::new(&config.persistence.database_path).await?;
        Self::new(Arc::new(db), Arc::new(client), config)
    }

    /// Event fan-out for this scheduler
    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    /// The configuration the scheduler runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ids currently dispatched, ascending
    pub async fn in_flight(&self) -> Vec<RecordId> {
        let state = self.state.lock().await;
        let mut ids: Vec<_> = state.in_flight.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Ids waiting in the in-memory queue, in dispatch order
    pub async fn queued(&self) -> Vec<RecordId> {
        let state = self.state.lock().await;
        state.queue.iter().map(|r| r.id).collect()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("running_tasks", &self.tasks.len())
            .field("stopped", &self.stop_token.is_cancelled())
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
