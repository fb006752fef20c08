//! Startup and shutdown coordination.

use crate::error::{Error, Result};
use crate::types::Event;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::{Completion, Scheduler};

impl Scheduler {
    /// Start the control loop
    ///
    /// Loads the queue once, then ticks every `tick_interval`; the first
    /// dispatch happens one interval after start. Fails if the scheduler is
    /// already running or has been stopped.
    pub async fn start(&self) -> Result<()> {
        if self.stop_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let mut control = self.control.lock().await;
        if control.is_some() {
            return Err(Error::Other("scheduler is already running".to_string()));
        }

        match self.store.begin_session().await {
            Ok(true) => tracing::warn!("Previous session did not shut down cleanly"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to record session start"),
        }

        let config = &self.config.scheduler;
        tracing::info!(
            tick_interval_ms = config.tick_interval.as_millis() as u64,
            max_concurrent_books = config.max_concurrent_books,
            refill_limit = config.refill_limit,
            "Starting book download scheduler"
        );

        {
            let mut state = self.state.lock().await;
            match self.refill(&mut state).await {
                Ok(()) => self.publish_queue(&state),
                Err(e) => tracing::warn!(error = %e, "Initial queue load failed"),
            }
        }

        let scheduler = self.clone();
        *control = Some(tokio::spawn(async move {
            scheduler.run_control_loop().await;
        }));
        Ok(())
    }

    async fn run_control_loop(&self) {
        let mut completions = self.completion_rx.lock().await;
        let period = self.config.scheduler.tick_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stopping = false;

        loop {
            tokio::select! {
                Some(completion) = completions.recv() => {
                    self.complete(completion).await;
                    // Cascade: a freed slot is refilled right away
                    if !stopping {
                        self.tick().await;
                    }
                }
                _ = interval.tick(), if !stopping => {
                    self.tick().await;
                }
                _ = self.stop_token.cancelled(), if !stopping => {
                    stopping = true;
                    self.tasks.close();
                    tracing::debug!(
                        running = self.tasks.len(),
                        "Timer stopped, waiting for running downloads"
                    );
                }
                _ = self.tasks.wait(), if stopping => break,
            }
        }

        self.drain_completions(&mut completions).await;
        tracing::debug!("Scheduler control loop exited");
    }

    /// Settle outcomes reported by tasks that have already exited
    ///
    /// Outcomes an earlier tick could not persist get one last attempt; any
    /// still unsettled are logged and their records stay `Downloading`.
    async fn drain_completions(&self, completions: &mut mpsc::UnboundedReceiver<Completion>) {
        while let Ok(completion) = completions.try_recv() {
            self.complete(completion).await;
        }

        let mut state = self.state.lock().await;
        self.settle_unsettled(&mut state).await;
        for completion in &state.unsettled {
            tracing::error!(
                record_id = completion.record.id.0,
                state = %completion.outcome.terminal_state(),
                "Download outcome lost at stop, record left Downloading"
            );
        }
    }

    /// Stop the timer and wait for running downloads to settle
    ///
    /// Running tasks finish normally and their outcomes are persisted. No new
    /// record is dispatched afterwards; a stopped scheduler cannot be
    /// restarted.
    pub async fn stop(&self) {
        tracing::info!(running = self.tasks.len(), "Stopping book download scheduler");
        self.stop_token.cancel();

        let handle = self.control.lock().await.take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Scheduler control loop panicked");
                }
            }
            None => {
                // Never started; tasks may still come from manual ticks
                self.tasks.close();
                self.tasks.wait().await;
                let mut completions = self.completion_rx.lock().await;
                self.drain_completions(&mut completions).await;
            }
        }

        tracing::info!("Book download scheduler stopped");
    }

    /// Move every `Downloading` record in the store to `Paused`
    ///
    /// Returns how many records were paused. Paused records stay paused until
    /// reset externally.
    pub async fn pause_all_downloads(&self) -> Result<u64> {
        let count = self.store.pause_all_downloading().await?;
        tracing::info!(count, "Paused all downloading records");
        self.notifier.emit(Event::Paused { count });
        Ok(count)
    }

    /// Gracefully shut down the scheduler
    ///
    /// 1. Stops the timer so nothing new is dispatched
    /// 2. Pauses every `Downloading` record in the store
    /// 3. Cancels chapter fetches that have not started yet
    /// 4. Waits up to `shutdown_timeout` for running tasks
    /// 5. Marks the session as cleanly ended and emits [`Event::Shutdown`]
    ///
    /// Later steps run even when earlier ones fail.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.stop_token.cancel();

        if let Err(e) = self.pause_all_downloads().await {
            tracing::error!(error = %e, "Failed to pause downloading records during shutdown");
        }

        self.task_token.cancel();

        let timeout = self.config.scheduler.shutdown_timeout;
        if tokio::time::timeout(timeout, self.stop()).await.is_err() {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Timeout waiting for downloads to settle, proceeding with shutdown"
            );
        }

        if let Err(e) = self.store.end_session().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown");
        }

        self.notifier.emit(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
