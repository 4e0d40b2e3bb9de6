//! ytdl-queue library
//!
//! A download queue for `yt-dlp`: bounded concurrency, retries with
//! exponential backoff, pause/resume/cancel without losing queue position,
//! and an append-only archive so a source is never fetched twice.
//!
//! # Architecture
//!
//! - [`queue`] - the [`QueueManager`], its items, and the optional SQLite state store
//! - [`download`] - the [`Fetcher`] contract, the `yt-dlp` fetcher, and the retry policy
//! - [`archive`] - persisted record of completed sources
//! - [`source`] - URL to archive identity resolution
//! - [`media`] - kind, format, and resolution descriptors
//! - [`config`] - queue configuration
//! - [`db`] - SQLite connection and migrations

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod config;
pub mod db;
pub mod download;
pub mod media;
pub mod queue;
pub mod source;

// Re-export commonly used types
pub use archive::{Archive, ArchiveEntry, ArchiveError};
pub use config::{DEFAULT_CONCURRENCY, PausePolicy, QueueConfig};
pub use db::{Database, DbError};
pub use download::{
    CancelToken, DEFAULT_MAX_RETRIES, FailureType, FetchError, FetchErrorKind, FetchOutput,
    FetchRequest, Fetcher, ProgressReporter, RetryDecision, RetryPolicy, YtDlpFetcher,
    YtDlpOptions, classify_error,
};
pub use media::{MediaKind, OutputFormat, Resolution};
pub use queue::{
    DownloadItem, EnqueueRequest, ItemId, ItemStatus, QueueError, QueueManager, QueueSnapshot,
    QueueStore, RetryReport, StatusCounts,
};
pub use source::{SourceError, SourceId};
