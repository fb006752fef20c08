//! Queue refill, deduplication and dispatch.

use crate::error::{Error, Result};
use crate::types::{BookDownloadRecord, DownloadState, Event, TaskOutcome};
use futures::FutureExt;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::{Completion, DownloadTask, QueueState, Scheduler};

impl Scheduler {
    /// Run one scheduling pass, returning how many records were dispatched
    ///
    /// A pass does nothing while every slot is busy. Otherwise it rebuilds the
    /// queue from the store and dispatches one record per free slot. A storage
    /// failure is logged and ends the pass; the next tick tries again.
    pub async fn tick(&self) -> usize {
        match self.try_tick().await {
            Ok(dispatched) => dispatched,
            Err(Error::ShuttingDown) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "Scheduler tick aborted");
                0
            }
        }
    }

    pub(crate) async fn try_tick(&self) -> Result<usize> {
        if self.stop_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let mut state = self.state.lock().await;
        self.settle_unsettled(&mut state).await;

        let max = self.config.scheduler.max_concurrent_books;
        if state.in_flight.len() >= max {
            tracing::debug!(
                in_flight = state.in_flight.len(),
                max_concurrent_books = max,
                "All slots busy, skipping tick"
            );
            return Ok(0);
        }

        self.refill(&mut state).await?;

        let free = max - state.in_flight.len();
        let mut dispatched = 0;
        while dispatched < free {
            let Some(record) = state.queue.pop_front() else {
                break;
            };
            if self.dispatch(&mut state, record).await? {
                dispatched += 1;
            }
        }

        self.publish_queue(&state);
        Ok(dispatched)
    }

    /// Rebuild the queue from the store's `Pending` records
    ///
    /// The queue is replaced wholesale so records inserted by other writers
    /// show up on the next pass. Ids already in flight or already queued by
    /// this refill are skipped.
    pub(crate) async fn refill(&self, state: &mut QueueState) -> Result<()> {
        let pending = self
            .store
            .get_pending(self.config.scheduler.refill_limit)
            .await?;
        let fetched = pending.len();

        let mut seen = HashSet::with_capacity(fetched);
        let queue: VecDeque<BookDownloadRecord> = pending
            .into_iter()
            .filter(|record| !state.in_flight.contains(&record.id) && seen.insert(record.id))
            .collect();
        state.queue = queue;

        tracing::debug!(fetched, queued = state.queue.len(), "Queue refilled");
        Ok(())
    }

    /// Claim `record` in the store and hand it to a worker
    ///
    /// Returns false when the store refused the claim because the record is
    /// no longer `Pending`; storage failures propagate and abort the tick.
    async fn dispatch(
        &self,
        state: &mut QueueState,
        mut record: BookDownloadRecord,
    ) -> Result<bool> {
        // Persist first: a crash from here on leaves the record visibly Downloading
        match self
            .store
            .update_state(record.id, DownloadState::Downloading, None)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_storage() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    record_id = record.id.0,
                    error = %e,
                    "Record could not be claimed, skipping"
                );
                return Ok(false);
            }
        }

        record.state = DownloadState::Downloading;
        state.in_flight.insert(record.id);
        tracing::info!(
            record_id = record.id.0,
            title = %record.title,
            chapters = record.chapter_list.len(),
            remaining = state.queue.len(),
            "Dispatching book download"
        );

        self.notifier.emit(Event::Started {
            record: record.clone(),
        });
        self.spawn_download(record);
        Ok(true)
    }

    fn spawn_download(&self, record: BookDownloadRecord) {
        let task = DownloadTask::new(Arc::clone(&self.client), self.config.download.clone())
            .with_cancel_token(self.task_token.child_token());
        let completion_tx = self.completion_tx.clone();

        self.tasks.spawn(async move {
            let outcome = AssertUnwindSafe(task.run(&record))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(record_id = record.id.0, "Download task panicked");
                    TaskOutcome::failed("download task panicked")
                });

            let id = record.id;
            if completion_tx.send(Completion { record, outcome }).is_err() {
                tracing::warn!(record_id = id.0, "Scheduler is gone, dropping download outcome");
            }
        });
    }

    /// Tell observers which ids are still waiting
    pub(crate) fn publish_queue(&self, state: &QueueState) {
        self.notifier.emit(Event::QueueUpdated {
            pending: state.queue.iter().map(|r| r.id).collect(),
        });
    }
}
