//! Append-only archive of completed downloads.
//!
//! The archive file holds one record per line:
//!
//! ```text
//! youtube dQw4w9WgXcQ 2026-01-01T12:00:00+00:00
//! youtube:playlist PL1234567890 2026-01-01T12:05:00+00:00
//! ```
//!
//! Lines starting with `#` and blank lines are ignored. Two-field lines (the
//! format yt-dlp writes for `--download-archive`) are accepted with no
//! timestamp, and a bare id is read as a YouTube video id, so an existing
//! yt-dlp archive can be reused directly.
//!
//! Recording a completion appends a single line and calls `sync_data` before
//! returning; the file is never rewritten on the completion path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::source::{SourceId, YOUTUBE_EXTRACTOR};

/// Errors from archive file operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Reading, appending to, or syncing the archive file failed.
    #[error("archive I/O error on {path}: {source}\n  Suggestion: Check permissions and free space for the archive file")]
    Io {
        /// The archive file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One archived completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Identity of the completed source.
    pub source: SourceId,
    /// When it completed, if the record carried a timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ArchiveEntry {
    fn to_line(&self) -> String {
        match self.completed_at {
            Some(at) => format!("{} {}\n", self.source, at.to_rfc3339()),
            None => format!("{}\n", self.source),
        }
    }

    fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut fields = line.split_whitespace();
        let first = fields.next()?;
        let Some(second) = fields.next() else {
            return Some(Self {
                source: SourceId::new(YOUTUBE_EXTRACTOR, first),
                completed_at: None,
            });
        };
        let completed_at = fields.next().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| warn!(timestamp = raw, error = %e, "ignoring unparsable archive timestamp"))
                .ok()
        });
        Some(Self {
            source: SourceId::new(first, second),
            completed_at,
        })
    }
}

/// The persisted set of completed sources, held fully in memory.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    entries: HashMap<SourceId, Option<DateTime<Utc>>>,
    /// The file's last line has no `\n`; the next append starts a new line.
    unterminated: bool,
}

impl Archive {
    /// Loads the archive at `path`. A missing file is an empty archive; the
    /// file is created on the first append.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if the file exists but cannot be read.
    #[instrument(skip_all)]
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ArchiveError::io(&path, e)),
        };

        let mut entries = HashMap::new();
        for entry in raw.lines().filter_map(ArchiveEntry::from_line) {
            entries.insert(entry.source, entry.completed_at);
        }
        let unterminated = !raw.is_empty() && !raw.ends_with('\n');
        debug!(path = %path.display(), entries = entries.len(), unterminated, "archive loaded");

        Ok(Self {
            path,
            entries,
            unterminated,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if `source` has been recorded.
    #[must_use]
    pub fn contains(&self, source: &SourceId) -> bool {
        self.entries.contains_key(source)
    }

    /// Number of archived sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been archived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by source identity.
    #[must_use]
    pub fn entries(&self) -> Vec<ArchiveEntry> {
        let mut entries: Vec<ArchiveEntry> = self
            .entries
            .iter()
            .map(|(source, completed_at)| ArchiveEntry {
                source: source.clone(),
                completed_at: *completed_at,
            })
            .collect();
        entries.sort_by(|a, b| a.source.cmp(&b.source));
        entries
    }

    /// Records a completion: appends one line and syncs it to disk.
    ///
    /// Recording an already archived source is a no-op. The in-memory set is
    /// only updated after the write is durable, so a failed append leaves the
    /// archive unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if the directory, open, write, or sync fails.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn record(
        &mut self,
        source: &SourceId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), ArchiveError> {
        if self.contains(source) {
            return Ok(());
        }

        let entry = ArchiveEntry {
            source: source.clone(),
            completed_at: Some(completed_at),
        };
        let mut line = entry.to_line();
        if self.unterminated {
            line.insert(0, '\n');
        }
        if let Err(e) = self.append_line(&line).await {
            // a partial write may have left a dangling line; a blank line is harmless
            self.unterminated = true;
            return Err(e);
        }
        self.unterminated = false;
        self.entries.insert(entry.source, entry.completed_at);
        debug!("archived");
        Ok(())
    }

    async fn append_line(&self, line: &str) -> Result<(), ArchiveError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ArchiveError::io(&self.path, e))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        Ok(())
    }

    /// Removes a source so it can be downloaded again. Rewrites the whole file
    /// through a temporary file and rename; this is a maintenance operation
    /// and never runs on the completion path.
    ///
    /// Returns `false` if the source was not archived.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if the rewrite fails; the in-memory set is
    /// left unchanged in that case.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn remove(&mut self, source: &SourceId) -> Result<bool, ArchiveError> {
        let Some(completed_at) = self.entries.remove(source) else {
            return Ok(false);
        };

        if let Err(e) = self.rewrite().await {
            self.entries.insert(source.clone(), completed_at);
            return Err(e);
        }
        self.unterminated = false;
        Ok(true)
    }

    async fn rewrite(&self) -> Result<(), ArchiveError> {
        let contents: String = self.entries().iter().map(ArchiveEntry::to_line).collect();
        let tmp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| ArchiveError::io(&tmp_path, e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| ArchiveError::io(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| ArchiveError::io(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ArchiveError::io(&self.path, e))
    }

    /// Forgets every entry and deletes the backing file.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if the file exists and cannot be deleted.
    pub async fn clear(&mut self) -> Result<(), ArchiveError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ArchiveError::io(&self.path, e)),
        }
        self.entries.clear();
        self.unterminated = false;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn yt(id: &str) -> SourceId {
        SourceId::new("youtube", id)
    }

    #[test]
    fn test_entry_from_line_three_fields() {
        let entry = ArchiveEntry::from_line("youtube abc12345678 2026-01-01T12:00:00+00:00").unwrap();
        assert_eq!(entry.source, yt("abc12345678"));
        assert!(entry.completed_at.is_some());
    }

    #[test]
    fn test_entry_from_line_yt_dlp_format() {
        let entry = ArchiveEntry::from_line("youtube abc12345678").unwrap();
        assert_eq!(entry.source, yt("abc12345678"));
        assert!(entry.completed_at.is_none());
    }

    #[test]
    fn test_entry_from_line_bare_id_defaults_to_youtube() {
        let entry = ArchiveEntry::from_line("abc12345678").unwrap();
        assert_eq!(entry.source, yt("abc12345678"));
    }

    #[test]
    fn test_entry_from_line_skips_comments_and_blanks() {
        assert!(ArchiveEntry::from_line("# Some Title - 2026-01-01").is_none());
        assert!(ArchiveEntry::from_line("   ").is_none());
    }

    #[test]
    fn test_entry_from_line_bad_timestamp_keeps_entry() {
        let entry = ArchiveEntry::from_line("youtube abc12345678 yesterday").unwrap();
        assert_eq!(entry.source, yt("abc12345678"));
        assert!(entry.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open(dir.path().join("archive.txt")).await.unwrap();
        assert!(archive.is_empty());
        assert!(!archive.path().exists());
    }

    #[tokio::test]
    async fn test_record_appends_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("archive.txt");

        let mut archive = Archive::open(&path).await.unwrap();
        archive.record(&yt("vid00000001"), Utc::now()).await.unwrap();
        archive.record(&yt("vid00000002"), Utc::now()).await.unwrap();
        assert_eq!(archive.len(), 2);

        let reopened = Archive::open(&path).await.unwrap();
        assert!(reopened.contains(&yt("vid00000001")));
        assert!(reopened.contains(&yt("vid00000002")));
        assert_eq!(reopened.len(), 2);
    }

    #[tokio::test]
    async fn test_record_duplicate_does_not_append_twice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.txt");

        let mut archive = Archive::open(&path).await.unwrap();
        archive.record(&yt("vid00000001"), Utc::now()).await.unwrap();
        archive.record(&yt("vid00000001"), Utc::now()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_record_is_append_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.txt");
        std::fs::write(&path, "# kept comment\nyoutube existing0001\n").unwrap();

        let mut archive = Archive::open(&path).await.unwrap();
        archive.record(&yt("vid00000001"), Utc::now()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("# kept comment\nyoutube existing0001\n"));
        assert!(raw.contains("youtube vid00000001 "));
    }

    #[tokio::test]
    async fn test_record_after_unterminated_last_line_starts_new_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.txt");
        std::fs::write(&path, "youtube existing0001").unwrap();

        let mut archive = Archive::open(&path).await.unwrap();
        archive.record(&yt("newvideo001"), Utc::now()).await.unwrap();
        archive.record(&yt("newvideo002"), Utc::now()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("youtube existing0001\nyoutube newvideo001 "));
        assert_eq!(raw.lines().count(), 3);

        let reopened = Archive::open(&path).await.unwrap();
        assert!(reopened.contains(&yt("existing0001")));
        assert!(reopened.contains(&yt("newvideo001")));
        assert!(reopened.contains(&yt("newvideo002")));
    }

    #[tokio::test]
    async fn test_record_after_failed_append_still_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.txt");
        std::fs::create_dir(&path).unwrap();

        let mut archive = Archive::open(dir.path().join("missing.txt")).await.unwrap();
        archive.path = path.clone();
        assert!(archive.record(&yt("vid00000001"), Utc::now()).await.is_err());

        std::fs::remove_dir(&path).unwrap();
        archive.record(&yt("vid00000001"), Utc::now()).await.unwrap();

        let reopened = Archive::open(&path).await.unwrap();
        assert!(reopened.contains(&yt("vid00000001")));
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_rewrites_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.txt");

        let mut archive = Archive::open(&path).await.unwrap();
        archive.record(&yt("vid00000001"), Utc::now()).await.unwrap();
        archive.record(&yt("vid00000002"), Utc::now()).await.unwrap();

        assert!(archive.remove(&yt("vid00000001")).await.unwrap());
        assert!(!archive.remove(&yt("vid00000001")).await.unwrap());

        let reopened = Archive::open(&path).await.unwrap();
        assert!(!reopened.contains(&yt("vid00000001")));
        assert!(reopened.contains(&yt("vid00000002")));
    }

    #[tokio::test]
    async fn test_entries_sorted() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path().join("a.txt")).await.unwrap();
        archive.record(&yt("b0000000000"), Utc::now()).await.unwrap();
        archive.record(&yt("a0000000000"), Utc::now()).await.unwrap();

        let ids: Vec<String> = archive
            .entries()
            .into_iter()
            .map(|e| e.source.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a0000000000", "b0000000000"]);
    }

    #[tokio::test]
    async fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.txt");
        let mut archive = Archive::open(&path).await.unwrap();
        archive.record(&yt("vid00000001"), Utc::now()).await.unwrap();

        archive.clear().await.unwrap();
        assert!(archive.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_record_into_unwritable_location_fails_without_recording() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the open fail.
        let path = dir.path().join("archive.txt");
        std::fs::create_dir(&path).unwrap();

        let mut archive = Archive {
            path: path.clone(),
            entries: HashMap::new(),
            unterminated: false,
        };
        let result = archive.record(&yt("vid00000001"), Utc::now()).await;
        assert!(matches!(result, Err(ArchiveError::Io { .. })));
        assert!(!archive.contains(&yt("vid00000001")));
    }
}
