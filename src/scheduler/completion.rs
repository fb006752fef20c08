//! Persisting task outcomes.

use crate::types::Event;

use super::{Completion, QueueState, Scheduler};

impl Scheduler {
    /// Persist a finished task and notify observers
    pub(crate) async fn complete(&self, completion: Completion) {
        let mut state = self.state.lock().await;
        self.settle(&mut state, completion).await;
    }

    /// Retry outcomes whose terminal state could not be stored earlier
    pub(crate) async fn settle_unsettled(&self, state: &mut QueueState) {
        for completion in std::mem::take(&mut state.unsettled) {
            self.settle(state, completion).await;
        }
    }

    async fn settle(&self, state: &mut QueueState, completion: Completion) {
        let id = completion.record.id;
        let next = completion.outcome.terminal_state();
        let chapters = completion.outcome.chapters_written.map(|n| n as i64);

        match self.store.update_state(id, next, chapters).await {
            Ok(()) => {
                state.in_flight.remove(&id);
                self.announce(completion).await;
            }
            Err(e) if e.is_storage() => {
                // Keeps its slot until the outcome is durable
                tracing::error!(
                    record_id = id.0,
                    state = %next,
                    error = %e,
                    "Failed to persist download outcome, retrying next tick"
                );
                state.unsettled.push(completion);
            }
            Err(e) => {
                // Typically paused by a shutdown while the task was running
                state.in_flight.remove(&id);
                tracing::info!(
                    record_id = id.0,
                    state = %next,
                    error = %e,
                    "Download outcome not stored, record changed state meanwhile"
                );
            }
        }
    }

    /// Emit `completed` or `failed` with the record as stored
    async fn announce(&self, completion: Completion) {
        let Completion { mut record, outcome } = completion;

        match self.store.get_by_id(record.id).await {
            Ok(Some(stored)) => record = stored,
            Ok(None) => record.state = outcome.terminal_state(),
            Err(e) => {
                tracing::debug!(record_id = record.id.0, error = %e, "Could not reload record");
                record.state = outcome.terminal_state();
                if let Some(n) = outcome.chapters_written {
                    record.downloaded_chapter_count = n as i64;
                }
            }
        }

        if outcome.success {
            tracing::info!(
                record_id = record.id.0,
                title = %record.title,
                chapters = record.downloaded_chapter_count,
                "Book download completed"
            );
            self.notifier.emit(Event::Completed { record });
        } else {
            let reason = outcome
                .reason
                .unwrap_or_else(|| "download failed".to_string());
            tracing::warn!(
                record_id = record.id.0,
                title = %record.title,
                reason = %reason,
                "Book download failed"
            );
            self.notifier.emit(Event::Failed { record, reason });
        }
    }
}
