//! Queue manager configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::download::RetryPolicy;
use crate::queue::QueueError;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 16;

/// Default number of simultaneous downloads.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Default per-attempt time budget (30 minutes).
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// What `pause()` does to downloads that are already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausePolicy {
    /// Running downloads finish; nothing new starts.
    #[default]
    Finish,
    /// Running downloads are cancelled and go back to Pending with their
    /// attempt count unchanged.
    Interrupt,
}

impl PausePolicy {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finish => "finish",
            Self::Interrupt => "interrupt",
        }
    }
}

impl fmt::Display for PausePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PausePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "finish" => Ok(Self::Finish),
            "interrupt" => Ok(Self::Interrupt),
            _ => Err(format!("invalid pause policy: {s} (expected finish or interrupt)")),
        }
    }
}

/// Settings for a [`QueueManager`](crate::QueueManager).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    archive_path: PathBuf,
    state_db: Option<PathBuf>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    attempt_timeout: Duration,
    pause_policy: PausePolicy,
    restore_paused: bool,
}

impl QueueConfig {
    /// Defaults with the archive at `archive_path` and no state store.
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            state_db: None,
            concurrency: DEFAULT_CONCURRENCY,
            retry_policy: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            pause_policy: PausePolicy::default(),
            restore_paused: false,
        }
    }

    /// Persists queue state in a SQLite database at `path`.
    #[must_use]
    pub fn with_state_db(mut self, path: Option<PathBuf>) -> Self {
        self.state_db = path;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_pause_policy(mut self, policy: PausePolicy) -> Self {
        self.pause_policy = policy;
        self
    }

    /// When a state store is configured, start paused if the queue was
    /// paused when the previous process stopped.
    #[must_use]
    pub fn with_restore_paused(mut self, restore: bool) -> Self {
        self.restore_paused = restore;
        self
    }

    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    #[must_use]
    pub fn state_db(&self) -> Option<&Path> {
        self.state_db.as_deref()
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    #[must_use]
    pub fn pause_policy(&self) -> PausePolicy {
        self.pause_policy
    }

    #[must_use]
    pub fn restore_paused(&self) -> bool {
        self.restore_paused
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] if concurrency is outside
    /// `MIN_CONCURRENCY..=MAX_CONCURRENCY`.
    pub fn validate(&self) -> Result<(), QueueError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(QueueError::InvalidConcurrency {
                value: self.concurrency,
                min: MIN_CONCURRENCY,
                max: MAX_CONCURRENCY,
            });
        }
        Ok(())
    }
}
