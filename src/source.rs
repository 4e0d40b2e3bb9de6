//! Source identity resolution.
//!
//! A [`SourceId`] is the archive key for a URL: an extractor name plus an
//! extractor-specific id, rendered as `"<extractor> <id>"` exactly like the
//! lines of a yt-dlp download archive. Different URL spellings of the same
//! YouTube video (`watch?v=`, `youtu.be/`, `shorts/`, `embed/`) resolve to the
//! same identity, so the archive catches duplicates regardless of how the URL
//! was pasted.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::media::MediaKind;

/// Maximum URL length to accept.
pub const MAX_URL_LENGTH: usize = 2000;

/// Extractor name used for YouTube videos.
pub const YOUTUBE_EXTRACTOR: &str = "youtube";

/// Extractor name used for YouTube playlists.
pub const YOUTUBE_PLAYLIST_EXTRACTOR: &str = "youtube:playlist";

/// Extractor name used for URLs no specific rule recognises.
pub const GENERIC_EXTRACTOR: &str = "generic";

#[allow(clippy::expect_used)]
static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("video id regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static PLAYLIST_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{2,64}$").expect("playlist id regex is valid") // Static pattern, safe to panic
});

/// Errors produced while resolving a URL to a source identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// URL is malformed or uses an unsupported scheme.
    #[error("invalid URL '{url}': {reason}\n  Suggestion: {suggestion}")]
    InvalidUrl {
        /// The URL that failed validation.
        url: String,
        /// Why the URL is invalid.
        reason: String,
        /// How to fix the issue.
        suggestion: String,
    },

    /// URL exceeds the maximum accepted length.
    #[error("URL too long ({length} chars, max {MAX_URL_LENGTH})")]
    UrlTooLong {
        /// Actual length.
        length: usize,
    },
}

impl SourceError {
    fn malformed(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
            suggestion: "Check the URL format and try again".to_string(),
        }
    }
}

/// Identity of a downloadable source, used as the archive key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId {
    extractor: String,
    id: String,
}

impl SourceId {
    /// Creates an identity from its parts. Whitespace in either part is not
    /// representable in the archive format and is replaced with `_`.
    #[must_use]
    pub fn new(extractor: impl Into<String>, id: impl Into<String>) -> Self {
        let clean = |s: String| {
            if s.chars().any(char::is_whitespace) {
                s.chars()
                    .map(|c| if c.is_whitespace() { '_' } else { c })
                    .collect()
            } else {
                s
            }
        };
        Self {
            extractor: clean(extractor.into()),
            id: clean(id.into()),
        }
    }

    /// Extractor name (`youtube`, `youtube:playlist`, `generic`).
    #[must_use]
    pub fn extractor(&self) -> &str {
        &self.extractor
    }

    /// Extractor-specific id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolves a URL into its source identity.
    ///
    /// For [`MediaKind::Playlist`] the `list` parameter wins; for
    /// [`MediaKind::Video`] the video id wins even when a `list` parameter is
    /// present. URLs that match no known pattern get a `generic` identity
    /// keyed by the normalized URL (lowercased host, no fragment).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidUrl`] for unparsable URLs, non-http(s)
    /// schemes, or URLs without a host, and [`SourceError::UrlTooLong`] for
    /// URLs longer than [`MAX_URL_LENGTH`].
    pub fn resolve(raw_url: &str, kind: MediaKind) -> Result<Self, SourceError> {
        let raw_url = raw_url.trim();
        if raw_url.len() > MAX_URL_LENGTH {
            return Err(SourceError::UrlTooLong {
                length: raw_url.len(),
            });
        }

        let mut url = Url::parse(raw_url).map_err(|e| SourceError::malformed(raw_url, e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(SourceError::InvalidUrl {
                    url: raw_url.to_string(),
                    reason: format!("scheme '{other}' is not supported"),
                    suggestion: "Use http:// or https:// URLs".to_string(),
                });
            }
        }
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return Err(SourceError::malformed(raw_url, "URL has no host"));
        };

        if let Some(source) = youtube_identity(&url, &host, kind) {
            return Ok(source);
        }

        url.set_fragment(None);
        Ok(Self::new(GENERIC_EXTRACTOR, url.to_string()))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.extractor, self.id)
    }
}

fn youtube_identity(url: &Url, host: &str, kind: MediaKind) -> Option<SourceId> {
    let host = host.strip_prefix("www.").unwrap_or(host);
    let query = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    if host == "youtu.be" {
        if kind == MediaKind::Playlist
            && let Some(list) = query("list").filter(|l| PLAYLIST_ID.is_match(l))
        {
            return Some(SourceId::new(YOUTUBE_PLAYLIST_EXTRACTOR, list));
        }
        let id = url.path_segments()?.next()?;
        return VIDEO_ID
            .is_match(id)
            .then(|| SourceId::new(YOUTUBE_EXTRACTOR, id));
    }

    if !matches!(host, "youtube.com" | "m.youtube.com" | "music.youtube.com") {
        return None;
    }

    if kind == MediaKind::Playlist
        && let Some(list) = query("list").filter(|l| PLAYLIST_ID.is_match(l))
    {
        return Some(SourceId::new(YOUTUBE_PLAYLIST_EXTRACTOR, list));
    }

    let mut segments = url.path_segments()?;
    match segments.next()? {
        "watch" => query("v")
            .filter(|v| VIDEO_ID.is_match(v))
            .map(|v| SourceId::new(YOUTUBE_EXTRACTOR, v)),
        "shorts" | "embed" | "live" | "v" => segments
            .next()
            .filter(|v| VIDEO_ID.is_match(v))
            .map(|v| SourceId::new(YOUTUBE_EXTRACTOR, v)),
        "playlist" => query("list")
            .filter(|l| PLAYLIST_ID.is_match(l))
            .map(|l| SourceId::new(YOUTUBE_PLAYLIST_EXTRACTOR, l)),
        _ => None,
    }
}
