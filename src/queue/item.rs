//! Queue item types and status definitions.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::download::{FetchErrorKind, FetchRequest};
use crate::media::{MediaKind, OutputFormat, Resolution};
use crate::source::SourceId;

/// Identifier assigned to an item at enqueue time. Monotonic per queue.
pub type ItemId = i64;

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting to be dispatched (possibly waiting out a retry delay).
    Pending,
    /// A worker is fetching it.
    InProgress,
    /// Downloaded and archived.
    Completed,
    /// Failed permanently or ran out of attempts.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl ItemStatus {
    /// Returns the stored string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed and Cancelled items are never dispatched again
    /// (except Failed items explicitly re-queued by `retry_failed`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid item status: {s}")),
        }
    }
}

/// What the caller wants downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    /// Video or playlist URL.
    pub url: String,
    /// Single video or whole playlist.
    pub kind: MediaKind,
    /// Output container and codec.
    pub format: OutputFormat,
    /// Maximum height; `None` means best available.
    pub resolution: Option<Resolution>,
    /// Directory the output lands in.
    pub destination: PathBuf,
    /// Optional yt-dlp output template relative to `destination`.
    pub output_template: Option<String>,
    /// Download even if the source is already archived or queued.
    pub force: bool,
}

impl EnqueueRequest {
    /// A best-quality MP4 video request.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::default(),
            format: OutputFormat::default(),
            resolution: None,
            destination: destination.into(),
            output_template: None,
            force: false,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: Option<Resolution>) -> Self {
        self.resolution = resolution;
        self
    }

    #[must_use]
    pub fn with_output_template(mut self, template: Option<String>) -> Self {
        self.output_template = template;
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// A single item in the download queue.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    /// Unique identifier.
    pub id: ItemId,
    /// URL as enqueued.
    pub url: String,
    /// Archive identity resolved from the URL.
    pub source: SourceId,
    /// Media title, once a download has reported it.
    pub title: Option<String>,
    /// Single video or whole playlist.
    pub kind: MediaKind,
    /// Output container and codec.
    pub format: OutputFormat,
    /// Maximum height; `None` means best available.
    pub resolution: Option<Resolution>,
    /// Directory the output lands in.
    pub destination: PathBuf,
    /// Optional yt-dlp output template.
    pub output_template: Option<String>,
    /// Current status.
    pub status: ItemStatus,
    /// Number of fetch attempts started.
    pub attempts: u32,
    /// Percent of the current attempt downloaded; 100 once completed.
    pub progress: f32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Classification of the most recent failure.
    pub failure_kind: Option<FetchErrorKind>,
    /// Set while waiting out a retry delay; the scheduler skips the item
    /// until this instant.
    #[serde(skip)]
    pub next_eligible_at: Option<Instant>,
    /// Downloaded file (or playlist folder) once completed.
    pub output_path: Option<PathBuf>,
    /// Skip the archive checks.
    pub force: bool,
    /// When the item was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the latest attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the item completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the item last changed.
    pub updated_at: DateTime<Utc>,
    /// Sort key for dispatch order; bumped when an item is re-queued.
    #[serde(skip)]
    pub(crate) position: i64,
}

impl DownloadItem {
    pub(crate) fn from_request(
        id: ItemId,
        position: i64,
        source: SourceId,
        request: EnqueueRequest,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            url: request.url.trim().to_string(),
            source,
            title: None,
            kind: request.kind,
            format: request.format,
            resolution: request.resolution,
            destination: request.destination,
            output_template: request.output_template,
            status: ItemStatus::Pending,
            attempts: 0,
            progress: 0.0,
            last_error: None,
            failure_kind: None,
            next_eligible_at: None,
            output_path: None,
            force: request.force,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            position,
        }
    }

    /// The request handed to the fetcher.
    #[must_use]
    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            url: self.url.clone(),
            kind: self.kind,
            format: self.format,
            resolution: self.resolution,
            destination: self.destination.clone(),
            output_template: self.output_template.clone(),
        }
    }

    /// Pending and past any retry delay.
    #[must_use]
    pub fn is_dispatchable(&self, now: Instant) -> bool {
        self.status == ItemStatus::Pending && self.next_eligible_at.is_none_or(|at| at <= now)
    }

    pub(crate) fn set_status(&mut self, status: ItemStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Moves to InProgress for a new attempt.
    pub(crate) fn mark_started(&mut self) {
        self.set_status(ItemStatus::InProgress);
        self.attempts += 1;
        self.progress = 0.0;
        self.next_eligible_at = None;
        self.started_at = Some(self.updated_at);
    }

    /// Moves to Completed. `output_path` is `None` when nothing was fetched.
    pub(crate) fn mark_completed(&mut self, output_path: Option<PathBuf>, title: Option<String>) {
        self.set_status(ItemStatus::Completed);
        self.progress = 100.0;
        self.completed_at = Some(self.updated_at);
        self.next_eligible_at = None;
        self.last_error = None;
        self.failure_kind = None;
        self.output_path = output_path;
        if title.is_some() {
            self.title = title;
        }
    }
}

/// Number of items in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    /// Counts `items` by status.
    #[must_use]
    pub fn tally<'a>(items: impl IntoIterator<Item = &'a DownloadItem>) -> Self {
        let mut counts = Self::default();
        for item in items {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::InProgress => counts.in_progress += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
                ItemStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Total number of items.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed + self.cancelled
    }
}

/// Read-only copy of the queue at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    /// Every item in dispatch order.
    pub items: Vec<DownloadItem>,
    /// `start()` has been called.
    pub started: bool,
    /// Dispatch is paused.
    pub paused: bool,
    /// Per-status counts.
    pub counts: StatusCounts,
}

impl QueueSnapshot {
    /// Looks up an item by id.
    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<&DownloadItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Number of items in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the queue holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Nothing is running, and nothing will run without outside action.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.counts.in_progress == 0 && (self.counts.pending == 0 || self.paused)
    }
}

/// Outcome of [`QueueManager::retry_failed`](super::QueueManager::retry_failed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    /// Failed items moved back to Pending at the end of the queue.
    pub requeued: Vec<ItemId>,
    /// Failed items left alone because they already used every attempt.
    pub exhausted: Vec<ItemId>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn item() -> DownloadItem {
        DownloadItem::from_request(
            1,
            1,
            SourceId::new("youtube", "dQw4w9WgXcQ"),
            EnqueueRequest::new(" https://youtu.be/dQw4w9WgXcQ ", "/downloads"),
        )
    }

    #[test]
    fn test_item_status_roundtrip() {
        for status in [
            ItemStatus::Pending,
            ItemStatus::InProgress,
            ItemStatus::Completed,
            ItemStatus::Failed,
            ItemStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!("done".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::InProgress.is_terminal());
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(ItemStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_item_is_pending_with_trimmed_url() {
        let item = item();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.url, "https://youtu.be/dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_dispatchable_respects_backoff() {
        let mut item = item();
        let now = Instant::now();
        assert!(item.is_dispatchable(now));

        item.next_eligible_at = Some(now + Duration::from_secs(5));
        assert!(!item.is_dispatchable(now));
        assert!(item.is_dispatchable(now + Duration::from_secs(5)));

        item.next_eligible_at = None;
        item.set_status(ItemStatus::InProgress);
        assert!(!item.is_dispatchable(now));
    }

    #[test]
    fn test_mark_started_and_completed() {
        let mut item = item();
        item.progress = 40.0;
        item.mark_started();
        assert_eq!(item.status, ItemStatus::InProgress);
        assert_eq!(item.attempts, 1);
        assert!(item.progress.abs() < f32::EPSILON);
        assert!(item.started_at.is_some());
        assert!(item.completed_at.is_none());

        item.mark_completed(Some(PathBuf::from("/downloads/a.mp4")), Some("A".to_string()));
        assert_eq!(item.status, ItemStatus::Completed);
        assert!((item.progress - 100.0).abs() < f32::EPSILON);
        assert!(item.completed_at.is_some());
        assert_eq!(item.title.as_deref(), Some("A"));

        // an archived skip keeps a title learned earlier
        item.mark_completed(None, None);
        assert_eq!(item.title.as_deref(), Some("A"));
        assert!(item.output_path.is_none());
    }

    #[test]
    fn test_fetch_request_copies_item_fields() {
        let item = item();
        let request = item.fetch_request();
        assert_eq!(request.url, item.url);
        assert_eq!(request.destination, PathBuf::from("/downloads"));
        assert_eq!(request.kind, MediaKind::Video);
    }

    #[test]
    fn test_snapshot_idle_when_paused_with_pending() {
        let items = vec![item()];
        let snapshot = QueueSnapshot {
            counts: StatusCounts::tally(&items),
            items,
            started: true,
            paused: true,
        };
        assert!(snapshot.is_idle());
        assert_eq!(snapshot.counts.total(), 1);
        assert!(snapshot.get(1).is_some());
        assert!(snapshot.get(2).is_none());
    }
}
