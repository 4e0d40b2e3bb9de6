//! The contract between the queue and whatever actually downloads bytes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::FetchError;
use crate::media::{MediaKind, OutputFormat, Resolution};

/// Everything a fetcher needs to download one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Source URL as enqueued.
    pub url: String,
    /// Single video or whole playlist.
    pub kind: MediaKind,
    /// Container and codec.
    pub format: OutputFormat,
    /// Maximum height; `None` means best available.
    pub resolution: Option<Resolution>,
    /// Directory the output lands in.
    pub destination: PathBuf,
    /// Optional output template relative to `destination`, in yt-dlp syntax.
    pub output_template: Option<String>,
}

/// What a successful fetch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    /// Downloaded file, or the playlist folder.
    pub path: PathBuf,
    /// Media title as reported by the downloader (the playlist title for
    /// playlists).
    pub title: Option<String>,
}

impl FetchOutput {
    /// An output with no known title.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Reports how far a running fetch has got, as a percentage.
///
/// Reports are coalesced: the receiver only ever sees the latest value, so a
/// fetcher can report as often as it likes.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<f32>>,
}

impl ProgressReporter {
    /// A reporter and the receiver that observes it. The receiver starts at 0.
    #[must_use]
    pub fn channel() -> (Self, watch::Receiver<f32>) {
        let (tx, rx) = watch::channel(0.0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// A reporter nobody listens to.
    #[must_use]
    pub fn detached() -> Self {
        Self::channel().0
    }

    /// Publishes `percent`, clamped to `0..=100`. Non-finite values and
    /// repeats of the current value are dropped.
    pub fn report(&self, percent: f32) {
        if !percent.is_finite() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        self.tx.send_if_modified(|current| {
            if (*current - percent).abs() < f32::EPSILON {
                false
            } else {
                *current = percent;
                true
            }
        });
    }

    /// Last reported value.
    #[must_use]
    pub fn current(&self) -> f32 {
        *self.tx.borrow()
    }
}

/// Cooperative cancellation signal handed to a fetch attempt.
///
/// Clones share state: cancelling any clone cancels them all.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes when the token is cancelled. Returns immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in self, so wait_for cannot observe a closed channel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Downloads a single request.
///
/// Implementations should watch `cancel` and return
/// [`FetchError::cancelled`] promptly when it fires. A fetcher that ignores
/// the token still works: the queue discards its result. Reporting through
/// `progress` is optional.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads `request` and returns the produced file (or the playlist
    /// folder) with its title when known.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] whose kind decides whether the queue retries.
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: CancelToken,
        progress: ProgressReporter,
    ) -> Result<FetchOutput, FetchError>;
}
