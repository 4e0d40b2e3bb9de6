//! Error types reported by fetchers.
//!
//! A fetcher reports failures as a [`FetchError`]: a [`FetchErrorKind`] that
//! drives retry decisions plus a human-readable message that ends up as the
//! item's `last_error`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed fetch, as reported by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Network or server hiccup; the same request may succeed later.
    Transient,
    /// The source exists but refuses access (private, members-only, geo-blocked, 403).
    PermanentAccessDenied,
    /// The URL is not something the downloader can handle (unsupported, removed, 404).
    PermanentInvalidUrl,
    /// The attempt exceeded its time budget.
    Timeout,
    /// The attempt observed its cancel token and stopped.
    Cancelled,
}

impl FetchErrorKind {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::PermanentAccessDenied => "permanent_access_denied",
            Self::PermanentInvalidUrl => "permanent_invalid_url",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FetchErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "permanent_access_denied" => Ok(Self::PermanentAccessDenied),
            "permanent_invalid_url" => Ok(Self::PermanentInvalidUrl),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid fetch error kind: {s}")),
        }
    }
}

/// A failed fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    /// What went wrong, for retry classification.
    pub kind: FetchErrorKind,
    /// Details for the user.
    pub message: String,
}

impl FetchError {
    /// Creates an error of the given kind.
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transient, message)
    }

    /// Creates an access-denied error.
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::PermanentAccessDenied, message)
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::PermanentInvalidUrl, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(FetchErrorKind::Cancelled, "download cancelled")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_includes_kind_and_message() {
        let err = FetchError::access_denied("HTTP Error 403: Forbidden");
        assert_eq!(err.to_string(), "permanent_access_denied: HTTP Error 403: Forbidden");
    }

    #[test]
    fn test_fetch_error_kind_from_str_roundtrip() {
        for kind in [
            FetchErrorKind::Transient,
            FetchErrorKind::PermanentAccessDenied,
            FetchErrorKind::PermanentInvalidUrl,
            FetchErrorKind::Timeout,
            FetchErrorKind::Cancelled,
        ] {
            assert_eq!(kind.as_str().parse::<FetchErrorKind>().unwrap(), kind);
        }
        assert!("nope".parse::<FetchErrorKind>().is_err());
    }

    #[test]
    fn test_fetch_error_kind_serde_snake_case() {
        let json = serde_json::to_string(&FetchErrorKind::PermanentInvalidUrl).unwrap();
        assert_eq!(json, "\"permanent_invalid_url\"");
    }
}
