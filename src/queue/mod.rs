//! Download queue manager.
//!
//! The queue owns every [`DownloadItem`] and the [`Archive`], and moves items
//! through their lifecycle:
//!
//! ```text
//! Pending -> InProgress -> Completed
//!                       -> Failed            (permanent, or out of attempts)
//!                       -> Pending           (retryable failure, after a delay)
//!                       -> Pending           (interrupted by pause/shutdown)
//! Pending | InProgress  -> Cancelled
//! ```
//!
//! While an item is InProgress its `progress` follows what the fetcher
//! reports; every report publishes a new snapshot.
//!
//! # Overview
//!
//! - [`QueueManager`] - the public handle; cheap to clone
//! - [`DownloadItem`] / [`ItemStatus`] - queue entries
//! - [`QueueSnapshot`] - read-only view published after every change
//! - [`QueueStore`] - optional SQLite mirror of the queue
//!
//! # Concurrency
//!
//! All mutation goes through one async mutex around the queue state. A single
//! scheduler task dispatches Pending items in FIFO order, each holding one
//! semaphore permit for the life of its attempt. Retry delays are stored on
//! the item and observed by the scheduler, so a waiting item never holds a
//! worker slot. `status()` reads the last published snapshot and never waits
//! on the lock.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ytdl_queue::{EnqueueRequest, QueueConfig, QueueManager, YtDlpFetcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueConfig::new("archive.txt");
//! let queue = QueueManager::open(config, Arc::new(YtDlpFetcher::new())).await?;
//! let id = queue
//!     .enqueue(EnqueueRequest::new("https://youtu.be/dQw4w9WgXcQ", "./downloads"))
//!     .await?;
//! queue.start().await;
//! queue.wait_until_idle().await;
//! println!("{:?}", queue.get(id).map(|item| item.status));
//! queue.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod item;
mod scheduler;
mod store;

pub use error::{QueueError, StoreError, StoreErrorKind};
pub use item::{
    DownloadItem, EnqueueRequest, ItemId, ItemStatus, QueueSnapshot, RetryReport, StatusCounts,
};
pub use store::{QueueStore, StoredQueue};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::archive::Archive;
use crate::config::{PausePolicy, QueueConfig};
use crate::download::{CancelToken, Fetcher};
use crate::media::MediaKind;
use crate::source::SourceId;

/// Why an in-flight attempt was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// `cancel(id)`: the item ends Cancelled whatever the fetch returns.
    Cancel,
    /// `pause()` with [`PausePolicy::Interrupt`] or `shutdown()`: the item
    /// goes back to Pending unless the fetch already succeeded.
    Interrupt,
}

#[derive(Debug)]
struct InFlight {
    cancel: CancelToken,
    stop: Option<StopReason>,
}

impl InFlight {
    fn stop(&mut self, reason: StopReason) {
        // cancel is never downgraded to interrupt
        if self.stop != Some(StopReason::Cancel) {
            self.stop = Some(reason);
        }
        self.cancel.cancel();
    }
}

struct QueueState {
    items: Vec<DownloadItem>,
    archive: Archive,
    store: Option<QueueStore>,
    in_flight: HashMap<ItemId, InFlight>,
    next_id: ItemId,
    next_position: i64,
    started: bool,
    paused: bool,
    shutting_down: bool,
    scheduler: Option<JoinHandle<()>>,
}

impl QueueState {
    fn index_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn has_active_source(&self, source: &SourceId) -> bool {
        self.items.iter().any(|item| {
            &item.source == source
                && matches!(item.status, ItemStatus::Pending | ItemStatus::InProgress)
        })
    }

    fn take_position(&mut self) -> i64 {
        let position = self.next_position;
        self.next_position += 1;
        position
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            counts: StatusCounts::tally(&self.items),
            items: self.items.clone(),
            started: self.started,
            paused: self.paused,
        }
    }

    /// Mirrors one item to the state store. Failures are logged only.
    async fn persist(&self, idx: usize) {
        if let (Some(store), Some(item)) = (&self.store, self.items.get(idx))
            && let Err(e) = store.upsert(item).await
        {
            warn!(item_id = item.id, error = %e, "failed to persist queue item");
        }
    }

    async fn persist_paused(&self) {
        if let Some(store) = &self.store
            && let Err(e) = store.set_paused(self.paused).await
        {
            warn!(error = %e, "failed to persist paused flag");
        }
    }

    async fn forget(&self, ids: &[ItemId]) {
        if let Some(store) = &self.store
            && let Err(e) = store.remove(ids).await
        {
            warn!(error = %e, "failed to remove items from queue store");
        }
    }
}

struct Shared {
    state: Mutex<QueueState>,
    fetcher: Arc<dyn Fetcher>,
    config: QueueConfig,
    slots: Arc<Semaphore>,
    wake: Notify,
    snapshot: watch::Sender<QueueSnapshot>,
}

impl Shared {
    fn publish(&self, state: &QueueState) {
        self.snapshot.send_replace(state.snapshot());
    }
}

/// Handle to a download queue. Clones share the same queue.
///
/// The scheduler task keeps the queue alive until [`shutdown`](Self::shutdown)
/// is called.
#[derive(Clone)]
pub struct QueueManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueManager")
            .field("config", &self.shared.config)
            .field("counts", &self.shared.snapshot.borrow().counts)
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    /// Opens the archive (and the state store, if configured) and builds a
    /// stopped queue. Call [`start`](Self::start) to begin downloading.
    ///
    /// Items restored from the state store keep their order; items that were
    /// InProgress come back as Pending. The queue starts paused only if it was
    /// paused before and `restore_paused` is set.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] for a bad configuration,
    /// [`QueueError::Archive`] if the archive cannot be read, or
    /// [`QueueError::Store`] if the state store cannot be opened or loaded.
    #[instrument(skip(config, fetcher), fields(archive = %config.archive_path().display()))]
    pub async fn open(config: QueueConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, QueueError> {
        config.validate()?;

        let archive = Archive::open(config.archive_path()).await?;

        let (store, stored) = match config.state_db() {
            Some(path) => {
                let store = QueueStore::open(path).await?;
                let stored = store.load().await?;
                (Some(store), stored)
            }
            None => (None, StoredQueue::default()),
        };
        Ok(Self::assemble(config, fetcher, archive, store, stored))
    }

    /// Builds a queue around an already-open archive and store.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] for a bad configuration, or
    /// [`QueueError::Store`] if loading the store fails.
    pub async fn with_parts(
        config: QueueConfig,
        fetcher: Arc<dyn Fetcher>,
        archive: Archive,
        store: Option<QueueStore>,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        let stored = match &store {
            Some(store) => store.load().await?,
            None => StoredQueue::default(),
        };
        Ok(Self::assemble(config, fetcher, archive, store, stored))
    }

    fn assemble(
        config: QueueConfig,
        fetcher: Arc<dyn Fetcher>,
        archive: Archive,
        store: Option<QueueStore>,
        stored: StoredQueue,
    ) -> Self {
        let next_id = stored.items.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        let next_position = stored.items.iter().map(|i| i.position).max().unwrap_or(0) + 1;
        let paused = stored.paused && config.restore_paused();

        info!(
            concurrency = config.concurrency(),
            max_attempts = config.retry_policy().max_attempts(),
            archived = archive.len(),
            restored = stored.items.len(),
            paused,
            "queue opened"
        );

        let state = QueueState {
            items: stored.items,
            archive,
            store,
            in_flight: HashMap::new(),
            next_id,
            next_position,
            started: false,
            paused,
            shutting_down: false,
            scheduler: None,
        };
        let (snapshot, _) = watch::channel(state.snapshot());

        Self {
            shared: Arc::new(Shared {
                slots: Arc::new(Semaphore::new(config.concurrency())),
                state: Mutex::new(state),
                fetcher,
                config,
                wake: Notify::new(),
                snapshot,
            }),
        }
    }

    /// Configuration this queue runs with.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Adds a download at the end of the queue and returns its id.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidRequest`] if the URL is not a usable http(s) URL
    /// - [`QueueError::Duplicate`] if the source is archived or already
    ///   Pending/InProgress, unless `request.force` is set
    #[instrument(skip(self, request), fields(url = %request.url, force = request.force))]
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<ItemId, QueueError> {
        let source = SourceId::resolve(&request.url, request.kind)?;

        let mut state = self.shared.state.lock().await;
        if !request.force && (state.archive.contains(&source) || state.has_active_source(&source))
        {
            debug!(%source, "rejecting duplicate");
            return Err(QueueError::Duplicate { source_id: source });
        }

        let id = state.next_id;
        state.next_id += 1;
        let position = state.take_position();
        let item = DownloadItem::from_request(id, position, source, request);
        info!(item_id = id, source = %item.source, format = %item.format, "enqueued");

        state.items.push(item);
        state.persist(state.items.len() - 1).await;
        self.shared.publish(&state);
        drop(state);

        self.shared.wake.notify_one();
        Ok(id)
    }

    /// Starts the scheduler. Calling it again has no effect.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        let mut state = self.shared.state.lock().await;
        if state.started || state.shutting_down {
            return;
        }
        state.started = true;
        let shared = Arc::clone(&self.shared);
        state.scheduler = Some(tokio::spawn(shared.run_scheduler()));
        info!(pending = StatusCounts::tally(&state.items).pending, "queue started");
        self.shared.publish(&state);
    }

    /// Stops dispatching new items. With [`PausePolicy::Interrupt`] running
    /// downloads are cancelled and go back to Pending; with
    /// [`PausePolicy::Finish`] they run to completion. Idempotent.
    #[instrument(skip(self))]
    pub async fn pause(&self) {
        let mut state = self.shared.state.lock().await;
        if state.paused {
            return;
        }
        state.paused = true;

        let policy = self.shared.config.pause_policy();
        if policy == PausePolicy::Interrupt {
            for flight in state.in_flight.values_mut() {
                flight.stop(StopReason::Interrupt);
            }
        }
        info!(%policy, in_flight = state.in_flight.len(), "queue paused");

        state.persist_paused().await;
        self.shared.publish(&state);
    }

    /// Re-enables dispatch from the current queue position. Idempotent.
    #[instrument(skip(self))]
    pub async fn resume(&self) {
        let mut state = self.shared.state.lock().await;
        if !state.paused {
            return;
        }
        state.paused = false;
        info!("queue resumed");

        state.persist_paused().await;
        self.shared.publish(&state);
        drop(state);

        self.shared.wake.notify_one();
    }

    /// Cancels an item. A Pending item becomes Cancelled immediately; an
    /// InProgress item is signalled and becomes Cancelled when its attempt
    /// returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] for unknown ids and for items that
    /// are already Completed, Failed or Cancelled.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: ItemId) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock().await;
        let idx = state.index_of(id).ok_or(QueueError::NotFound(id))?;

        match state.items[idx].status {
            ItemStatus::Pending => {
                let item = &mut state.items[idx];
                item.set_status(ItemStatus::Cancelled);
                item.next_eligible_at = None;
                info!(item_id = id, "cancelled pending item");
                state.persist(idx).await;
                self.shared.publish(&state);
                Ok(())
            }
            ItemStatus::InProgress => {
                if let Some(flight) = state.in_flight.get_mut(&id) {
                    flight.stop(StopReason::Cancel);
                }
                info!(item_id = id, "cancellation requested for running item");
                Ok(())
            }
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Cancelled => {
                Err(QueueError::NotFound(id))
            }
        }
    }

    /// Moves every Failed item that still has attempts left back to Pending
    /// at the end of the queue, clearing its error. Items that used every
    /// attempt stay Failed and are listed in the report.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self) -> RetryReport {
        let max_attempts = self.shared.config.retry_policy().max_attempts();
        let mut state = self.shared.state.lock().await;
        let mut report = RetryReport::default();

        let (failed, mut rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.items)
            .into_iter()
            .partition(|item| item.status == ItemStatus::Failed);

        let mut exhausted = Vec::new();
        for mut item in failed {
            if item.attempts < max_attempts {
                item.set_status(ItemStatus::Pending);
                item.last_error = None;
                item.failure_kind = None;
                item.next_eligible_at = None;
                item.position = state.take_position();
                report.requeued.push(item.id);
                rest.push(item);
            } else {
                report.exhausted.push(item.id);
                exhausted.push(item);
            }
        }

        // exhausted items keep their place; requeued ones go last
        rest.extend(exhausted);
        rest.sort_by_key(|item| item.position);
        state.items = rest;

        for id in &report.requeued {
            if let Some(idx) = state.index_of(*id) {
                state.persist(idx).await;
            }
        }
        info!(
            requeued = report.requeued.len(),
            exhausted = report.exhausted.len(),
            "retried failed items"
        );
        self.shared.publish(&state);
        drop(state);

        self.shared.wake.notify_one();
        report
    }

    /// Current snapshot of the queue. Never waits on running downloads.
    #[must_use]
    pub fn status(&self) -> QueueSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Copy of one item.
    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<DownloadItem> {
        self.shared.snapshot.borrow().get(id).cloned()
    }

    /// Copies of every item with the given status, in queue order.
    #[must_use]
    pub fn items_with_status(&self, status: ItemStatus) -> Vec<DownloadItem> {
        self.shared
            .snapshot
            .borrow()
            .items
            .iter()
            .filter(|item| item.status == status)
            .cloned()
            .collect()
    }

    /// Waits until nothing is InProgress and nothing Pending can be
    /// dispatched (the queue is empty of work, or paused). Does not start
    /// the queue: on a queue that was never started with Pending items it
    /// waits for `start()`.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.shared.snapshot.subscribe();
        // the sender lives as long as self
        let _ = rx.wait_for(QueueSnapshot::is_idle).await;
    }

    /// Drops Completed and Cancelled items from the queue. Returns how many
    /// were removed.
    #[instrument(skip(self))]
    pub async fn clear_finished(&self) -> usize {
        let mut state = self.shared.state.lock().await;
        let (finished, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.items)
            .into_iter()
            .partition(|item| {
                matches!(item.status, ItemStatus::Completed | ItemStatus::Cancelled)
            });
        state.items = kept;

        let ids: Vec<ItemId> = finished.iter().map(|item| item.id).collect();
        if !ids.is_empty() {
            state.forget(&ids).await;
            info!(removed = ids.len(), "cleared finished items");
        }
        self.shared.publish(&state);
        ids.len()
    }

    /// Number of sources in the archive.
    pub async fn archived_count(&self) -> usize {
        self.shared.state.lock().await.archive.len()
    }

    /// Removes the source behind `url` from the archive so it can be
    /// downloaded again. Returns `false` if it was not archived.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidRequest`] if the URL is not usable, or
    /// [`QueueError::Archive`] if the archive cannot be rewritten.
    #[instrument(skip(self))]
    pub async fn forget(&self, url: &str, kind: MediaKind) -> Result<bool, QueueError> {
        let source = SourceId::resolve(url, kind)?;
        let mut state = self.shared.state.lock().await;
        let removed = state.archive.remove(&source).await?;
        if removed {
            info!(%source, "removed from archive");
        } else {
            debug!(%source, "not in archive");
        }
        Ok(removed)
    }

    /// Empties the archive. Returns how many sources it held.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Archive`] if the archive file cannot be deleted.
    #[instrument(skip(self))]
    pub async fn clear_archive(&self) -> Result<usize, QueueError> {
        let mut state = self.shared.state.lock().await;
        let count = state.archive.len();
        state.archive.clear().await?;
        warn!(removed = count, "archive cleared");
        Ok(count)
    }

    /// Stops the scheduler, interrupts running downloads (they go back to
    /// Pending), and waits for every worker to return. The queue cannot be
    /// started again afterwards.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let scheduler = {
            let mut state = self.shared.state.lock().await;
            if !state.shutting_down {
                state.shutting_down = true;
                for flight in state.in_flight.values_mut() {
                    flight.stop(StopReason::Interrupt);
                }
                info!(in_flight = state.in_flight.len(), "shutting down queue");
            }
            state.scheduler.take()
        };
        self.shared.wake.notify_one();

        if let Some(handle) = scheduler
            && let Err(e) = handle.await
        {
            warn!(error = %e, "scheduler task ended abnormally");
        }

        let mut rx = self.shared.snapshot.subscribe();
        let _ = rx.wait_for(|snapshot| snapshot.counts.in_progress == 0).await;
        debug!("queue shut down");
    }
}
