//! Lifecycle event fan-out.
//!
//! Two ways to observe the pipeline:
//! - [`EventNotifier::subscribe`] registers a callback for one [`EventKind`]
//!   (`started`, `completed`, `failed`). Callbacks run synchronously on the
//!   scheduler's control loop, so they should return quickly.
//! - [`EventNotifier::events`] hands out a broadcast receiver carrying every
//!   [`Event`], including queue snapshots, pause and shutdown notices.
//!
//! Delivery goes to whoever is registered at emission time. Nothing is
//! buffered for late subscribers beyond the broadcast channel's capacity.

use crate::types::{Event, EventKind};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Callback invoked with the event that matched its kind
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventNotifier::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
}

/// Fans events out to registered callbacks and broadcast receivers
///
/// Cloning is cheap and every clone shares the same subscribers.
#[derive(Clone)]
pub struct EventNotifier {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
    event_tx: broadcast::Sender<Event>,
}

impl EventNotifier {
    /// Create a notifier whose broadcast channel holds `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            event_tx,
        }
    }

    /// Register `handler` for events of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Subscription {
                id,
                kind,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a callback, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Receive every event emitted from now on
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Deliver `event` to matching callbacks and broadcast receivers
    ///
    /// A panicking callback is logged and skipped; the remaining callbacks
    /// still run.
    pub fn emit(&self, event: Event) {
        if let Some(kind) = event.kind() {
            // Snapshot so callbacks may (un)subscribe without deadlocking
            let handlers: Vec<EventHandler> = self
                .subscriptions
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| s.handler.clone())
                .collect();

            for handler in handlers {
                if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                    tracing::warn!(event = ?kind, "Event handler panicked");
                }
            }
        }

        // send() fails only when nobody holds a receiver
        self.event_tx.send(event).ok();
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self
            .subscriptions
            .read()
            .map(|s| s.len())
            .unwrap_or_default();
        f.debug_struct("EventNotifier")
            .field("handlers", &handlers)
            .field("receivers", &self.event_tx.receiver_count())
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookDownloadRecord, DownloadState, RecordId};
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn record(id: i64) -> BookDownloadRecord {
        BookDownloadRecord {
            id: RecordId(id),
            source_book_id: "s".into(),
            internal_book_id: "i".into(),
            title: "t".into(),
            chapter_list: Vec::new(),
            file_path: PathBuf::from("/tmp/out.txt"),
            downloaded_chapter_count: 0,
            state: DownloadState::Downloading,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let notifier = EventNotifier::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        notifier.subscribe(EventKind::Failed, move |event| {
            if let Event::Failed { record, reason } = event {
                sink.lock().unwrap().push((record.id, reason.clone()));
            }
        });

        notifier.emit(Event::Started { record: record(1) });
        notifier.emit(Event::Failed {
            record: record(2),
            reason: "chapter 3 fetch failed".into(),
        });
        notifier.emit(Event::Completed { record: record(3) });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, RecordId(2));
        assert_eq!(seen[0].1, "chapter 3 fetch failed");
    }

    #[test]
    fn every_subscriber_is_called() {
        let notifier = EventNotifier::default();
        let calls = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            notifier.subscribe(EventKind::Completed, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        notifier.emit(Event::Completed { record: record(1) });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribed_handler_is_not_called() {
        let notifier = EventNotifier::default();
        let calls = Arc::new(AtomicU64::new(0));

        let counter = calls.clone();
        let id = notifier.subscribe(EventKind::Started, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.emit(Event::Started { record: record(1) });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let notifier = EventNotifier::default();
        let calls = Arc::new(AtomicU64::new(0));

        notifier.subscribe(EventKind::Started, |_| panic!("observer bug"));
        let counter = calls.clone();
        notifier.subscribe(EventKind::Started, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        notifier.emit(Event::Started { record: record(1) });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcast_receivers_get_all_events() {
        let notifier = EventNotifier::default();
        let mut events = notifier.events();

        notifier.emit(Event::QueueUpdated {
            pending: vec![RecordId(4)],
        });
        notifier.emit(Event::Shutdown);

        match events.recv().await.unwrap() {
            Event::QueueUpdated { pending } => assert_eq!(pending, vec![RecordId(4)]),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events.recv().await.unwrap(), Event::Shutdown));
    }

    #[test]
    fn emitting_without_receivers_is_fine() {
        let notifier = EventNotifier::new(4);
        notifier.emit(Event::Paused { count: 2 });
    }
}
