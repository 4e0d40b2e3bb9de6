//! Requested media descriptors: what kind of source, which container, which height.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether a URL names a single video or a whole playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// One video; playlist parameters in the URL are ignored.
    #[default]
    Video,
    /// Every entry of a playlist, written into a per-playlist folder.
    Playlist,
}

impl MediaKind {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Playlist => "playlist",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "playlist" => Ok(Self::Playlist),
            _ => Err(format!("invalid media kind: {s}")),
        }
    }
}

/// Output container and codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// H.264/AAC video merged into an MP4 container.
    #[default]
    Mp4,
    /// Audio only, extracted and transcoded to MP3.
    Mp3,
}

impl OutputFormat {
    /// Returns the stable string representation (also the file extension).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mp3 => "mp3",
        }
    }

    /// True for formats that drop the video stream.
    #[must_use]
    pub fn is_audio_only(self) -> bool {
        matches!(self, Self::Mp3)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "mp3" => Ok(Self::Mp3),
            _ => Err(format!("invalid output format: {s} (expected mp4 or mp3)")),
        }
    }
}

/// Maximum video height to request. `None` on a request means best available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    P2160,
    P1440,
    P1080,
    P720,
    P480,
    P360,
}

impl Resolution {
    /// Every supported height, highest first.
    pub const ALL: [Self; 6] = [
        Self::P2160,
        Self::P1440,
        Self::P1080,
        Self::P720,
        Self::P480,
        Self::P360,
    ];

    /// Pixel height used in the format selector.
    #[must_use]
    pub fn height(self) -> u32 {
        match self {
            Self::P2160 => 2160,
            Self::P1440 => 1440,
            Self::P1080 => 1080,
            Self::P720 => 720,
            Self::P480 => 480,
            Self::P360 => 360,
        }
    }

    /// Looks up a resolution by its exact pixel height.
    #[must_use]
    pub fn from_height(height: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.height() == height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.height())
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Accepts `720`, `720p`, `4k` and `2k`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "4k" => return Ok(Self::P2160),
            "2k" => return Ok(Self::P1440),
            _ => {}
        }
        let digits = lowered.strip_suffix('p').unwrap_or(&lowered);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Self::from_height)
            .ok_or_else(|| {
                format!("invalid resolution: {s} (expected one of 2160, 1440, 1080, 720, 480, 360)")
            })
    }
}
