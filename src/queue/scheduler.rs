//! Dispatch loop and per-attempt bookkeeping.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::item::{DownloadItem, ItemId, ItemStatus};
use super::{InFlight, QueueState, Shared, StopReason};
use crate::download::{
    CancelToken, FailureType, FetchError, FetchOutput, FetchRequest, ProgressReporter,
    RetryDecision, classify_error,
};

/// Earliest future retry deadline among Pending items. Items that are
/// already eligible but waiting for a slot are woken by the worker that
/// frees the slot, not by a deadline.
fn next_deadline(items: &[DownloadItem], now: Instant) -> Option<Instant> {
    items
        .iter()
        .filter(|item| item.status == ItemStatus::Pending)
        .filter_map(|item| item.next_eligible_at)
        .filter(|at| *at > now)
        .min()
}

impl Shared {
    pub(super) async fn run_scheduler(self: Arc<Self>) {
        debug!("scheduler started");
        loop {
            let deadline = {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    break;
                }
                if !state.paused {
                    self.dispatch_ready(&mut state).await;
                }
                self.publish(&state);
                if state.paused {
                    None
                } else {
                    next_deadline(&state.items, Instant::now())
                }
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        () = self.wake.notified() => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }
        debug!("scheduler stopped");
    }

    /// Starts as many eligible items as there are free slots, in queue order.
    async fn dispatch_ready(self: &Arc<Self>, state: &mut QueueState) {
        loop {
            let now = Instant::now();
            let Some(idx) = state.items.iter().position(|item| item.is_dispatchable(now)) else {
                break;
            };

            // archived since enqueue (e.g. a duplicate that finished first)
            let item = &state.items[idx];
            if !item.force && state.archive.contains(&item.source) {
                let item = &mut state.items[idx];
                info!(item_id = item.id, source = %item.source, "already archived, skipping");
                item.mark_completed(None, None);
                state.persist(idx).await;
                continue;
            }

            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };

            let item = &mut state.items[idx];
            item.mark_started();
            let (id, attempt, request) = (item.id, item.attempts, item.fetch_request());
            info!(item_id = id, url = %item.url, attempt, "starting download");

            let cancel = CancelToken::new();
            state.in_flight.insert(
                id,
                InFlight {
                    cancel: cancel.clone(),
                    stop: None,
                },
            );
            state.persist(idx).await;

            let shared = Arc::clone(self);
            tokio::spawn(async move {
                shared.run_attempt(id, attempt, request, cancel, permit).await;
            });
        }
    }

    async fn run_attempt(
        self: Arc<Self>,
        id: ItemId,
        attempt: u32,
        request: FetchRequest,
        cancel: CancelToken,
        permit: OwnedSemaphorePermit,
    ) {
        let fetcher = Arc::clone(&self.fetcher);
        let token = cancel.clone();
        let (reporter, mut progress) = ProgressReporter::channel();
        // separate task so a panicking fetcher fails the attempt instead of
        // leaving the item InProgress
        let mut task =
            tokio::spawn(async move { fetcher.fetch(&request, token, reporter).await });

        let limit = self.config.attempt_timeout();
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                joined = &mut task => {
                    break joined.unwrap_or_else(|join_error| {
                        Err(FetchError::transient(format!("fetch task failed: {join_error}")))
                    });
                }
                () = &mut deadline => {
                    cancel.cancel();
                    task.abort();
                    break Err(FetchError::timeout(format!("attempt exceeded {limit:?}")));
                }
                Ok(()) = progress.changed() => {
                    let percent = *progress.borrow_and_update();
                    self.record_progress(id, percent).await;
                }
            }
        };

        self.finish_attempt(id, attempt, outcome).await;
        // the slot must be free before the scheduler looks for work
        drop(permit);
        self.wake.notify_one();
    }

    /// Publishes a running item's progress. Not persisted; the next status
    /// change writes it.
    async fn record_progress(&self, id: ItemId, percent: f32) {
        let mut state = self.state.lock().await;
        let Some(idx) = state.index_of(id) else {
            return;
        };
        let item = &mut state.items[idx];
        if item.status != ItemStatus::InProgress {
            return;
        }
        item.progress = percent;
        self.publish(&state);
    }

    async fn finish_attempt(
        &self,
        id: ItemId,
        attempt: u32,
        outcome: Result<FetchOutput, FetchError>,
    ) {
        let mut state = self.state.lock().await;
        let stop = state.in_flight.remove(&id).and_then(|flight| flight.stop);
        let Some(idx) = state.index_of(id) else {
            warn!(item_id = id, "finished attempt for unknown item");
            return;
        };

        match (stop, outcome) {
            (Some(StopReason::Cancel), outcome) => {
                let item = &mut state.items[idx];
                item.set_status(ItemStatus::Cancelled);
                info!(
                    item_id = id,
                    fetch_succeeded = outcome.is_ok(),
                    "cancelled running item"
                );
            }
            (Some(StopReason::Interrupt), Err(_)) => {
                let item = &mut state.items[idx];
                item.set_status(ItemStatus::Pending);
                item.attempts = item.attempts.saturating_sub(1);
                item.progress = 0.0;
                item.next_eligible_at = None;
                info!(item_id = id, attempt, "interrupted, back to pending");
            }
            (_, Ok(output)) => self.complete(&mut state, idx, output).await,
            (None, Err(error)) => self.fail(&mut state.items[idx], &error),
        }

        state.persist(idx).await;
        self.publish(&state);
    }

    async fn complete(&self, state: &mut QueueState, idx: usize, output: FetchOutput) {
        let source = state.items[idx].source.clone();
        match state.archive.record(&source, Utc::now()).await {
            Ok(()) => {
                let item = &mut state.items[idx];
                info!(
                    item_id = item.id,
                    attempts = item.attempts,
                    path = %output.path.display(),
                    title = output.title.as_deref().unwrap_or_default(),
                    "download completed"
                );
                item.mark_completed(Some(output.path), output.title);
            }
            Err(e) => {
                let item = &mut state.items[idx];
                item.set_status(ItemStatus::Failed);
                item.last_error = Some(e.to_string());
                item.failure_kind = None;
                error!(
                    item_id = item.id,
                    error = %e,
                    "archive write failed, pausing queue"
                );
                if !state.paused {
                    state.paused = true;
                    state.persist_paused().await;
                }
            }
        }
    }

    fn fail(&self, item: &mut DownloadItem, error: &FetchError) {
        let failure = classify_error(error);
        item.last_error = Some(error.message.clone());
        item.failure_kind = Some(error.kind);

        if failure == FailureType::Cancelled {
            item.set_status(ItemStatus::Cancelled);
            info!(item_id = item.id, "fetcher reported cancellation");
            return;
        }

        match self.config.retry_policy().should_retry(failure, item.attempts) {
            RetryDecision::Retry { delay, attempt } => {
                item.set_status(ItemStatus::Pending);
                item.progress = 0.0;
                item.next_eligible_at = Some(Instant::now() + delay);
                warn!(
                    item_id = item.id,
                    url = %item.url,
                    error = %error,
                    next_attempt = attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "download failed, will retry"
                );
            }
            RetryDecision::DoNotRetry { reason } => {
                item.set_status(ItemStatus::Failed);
                warn!(
                    item_id = item.id,
                    url = %item.url,
                    error = %error,
                    attempts = item.attempts,
                    reason = %reason,
                    "download failed"
                );
            }
        }
    }
}
