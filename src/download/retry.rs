//! Retry policy with exponential backoff for failed fetch attempts.
//!
//! When an attempt fails, the [`FetchError`] is classified into a
//! [`FailureType`]:
//! - [`FailureType::Transient`] - network hiccups and timeouts, retried with backoff
//! - [`FailureType::Permanent`] - invalid or removed URLs, never retried automatically
//! - [`FailureType::NeedsAuth`] - access denied, never retried automatically
//! - [`FailureType::Cancelled`] - the attempt was stopped on request; not a failure
//!
//! [`RetryPolicy::should_retry`] turns a failure type and attempt number into
//! a [`RetryDecision`]. The queue stores the returned delay as the item's next
//! eligible dispatch time instead of sleeping inside the worker.
//!
//! # Example
//!
//! ```
//! use ytdl_queue::download::{FetchError, FailureType, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = FetchError::transient("connection reset by peer");
//! assert_eq!(classify_error(&error), FailureType::Transient);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("not retrying: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::{FetchError, FetchErrorKind};

/// Default maximum attempts per item, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (2 seconds).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default maximum delay cap (2 minutes).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of fetch failures for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry (network, timeout).
    Transient,

    /// Failure that won't succeed regardless of retries (unsupported or removed URL).
    Permanent,

    /// The source refused access (private video, sign-in required, 403).
    NeedsAuth,

    /// The attempt stopped because it was asked to.
    Cancelled,
}

impl FailureType {
    /// True for failures the queue retries automatically.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the item once the delay has elapsed.
    Retry {
        /// How long the item must wait before it is eligible again.
        delay: Duration,
        /// Which attempt number the retry will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the item.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately 2s then 4s before the third and
/// final attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,

    /// Whether random jitter is added to each delay.
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings and jitter enabled.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (clamped to >= 1)
    /// * `base_delay` - Base delay for first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Determines whether to retry after a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "access denied - retry without credentials would not help"
                        .to_string(),
                };
            }
            FailureType::Cancelled => {
                return RetryDecision::DoNotRetry {
                    reason: "cancelled".to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay after the given failed attempt (1-indexed), with jitter if enabled.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 waits base * multiplier^0
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter {
            Self::calculate_jitter()
        } else {
            Duration::ZERO
        };

        Duration::from_millis(capped_ms as u64) + jitter
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter() -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a fetch error for retry decisions.
///
/// | Kind | Type |
/// |------|------|
/// | Transient | Transient |
/// | Timeout | Transient |
/// | PermanentAccessDenied | NeedsAuth |
/// | PermanentInvalidUrl | Permanent |
/// | Cancelled | Cancelled |
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error.kind {
        FetchErrorKind::Transient | FetchErrorKind::Timeout => FailureType::Transient,
        FetchErrorKind::PermanentAccessDenied => FailureType::NeedsAuth,
        FetchErrorKind::PermanentInvalidUrl => FailureType::Permanent,
        FetchErrorKind::Cancelled => FailureType::Cancelled,
    }
}
