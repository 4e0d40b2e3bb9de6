//! Fetching media through an external downloader.
//!
//! This module holds everything about a single download attempt: the
//! [`Fetcher`] contract the queue calls, the [`YtDlpFetcher`] that implements
//! it with a `yt-dlp` subprocess, and the [`RetryPolicy`] that decides what
//! happens after a failed attempt.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use ytdl_queue::download::{
//!     CancelToken, FetchRequest, Fetcher, ProgressReporter, YtDlpFetcher,
//! };
//! use ytdl_queue::media::{MediaKind, OutputFormat, Resolution};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = YtDlpFetcher::new();
//! let request = FetchRequest {
//!     url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
//!     kind: MediaKind::Video,
//!     format: OutputFormat::Mp4,
//!     resolution: Some(Resolution::P720),
//!     destination: PathBuf::from("./downloads"),
//!     output_template: None,
//! };
//! let (progress, _rx) = ProgressReporter::channel();
//! let output = fetcher.fetch(&request, CancelToken::new(), progress).await?;
//! println!("Downloaded: {}", output.path.display());
//! # Ok(())
//! # }
//! ```

mod error;
mod fetcher;
mod retry;
mod ytdlp;

pub use error::{FetchError, FetchErrorKind};
pub use fetcher::{CancelToken, FetchOutput, FetchRequest, Fetcher, ProgressReporter};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision,
    RetryPolicy, classify_error,
};
pub use ytdlp::{
    DEFAULT_AUDIO_QUALITY, DEFAULT_YT_DLP, YtDlpFetcher, YtDlpOptions, classify_stderr,
    format_selector,
};
