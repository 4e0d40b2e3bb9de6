//! [`Fetcher`] implementation that drives the `yt-dlp` binary.
//!
//! Each fetch spawns one `yt-dlp` process with a format selector derived from
//! the request's [`OutputFormat`] and [`Resolution`]. Output is read line by
//! line while the process runs:
//!
//! ```text
//! ytdlq-progress 1048576 10485760     downloaded and total bytes (--progress-template)
//! ytdlq-title Never Gonna Give You Up  after_move title (playlist title for playlists)
//! ytdlq-file /downloads/Never Gonna Give You Up.mp4
//! ```
//!
//! Progress lines may arrive on either stream. Stderr is classified into a
//! [`FetchErrorKind`] when the process fails. Cancellation kills the process,
//! and so does dropping the fetch future (the queue's per-attempt timeout
//! relies on this).
//!
//! [`Resolution`]: crate::media::Resolution

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{CancelToken, FetchError, FetchErrorKind, FetchOutput, FetchRequest, Fetcher, ProgressReporter};
use crate::media::{MediaKind, OutputFormat};

/// Program name looked up on `PATH` when no explicit binary is configured.
pub const DEFAULT_YT_DLP: &str = "yt-dlp";

/// Audio bitrate in kbps for MP3 extraction.
pub const DEFAULT_AUDIO_QUALITY: u32 = 192;

const VIDEO_TEMPLATE: &str = "%(title)s.%(ext)s";
const PLAYLIST_TEMPLATE: &str = "%(playlist)s/%(title)s.%(ext)s";

const PROGRESS_PREFIX: &str = "ytdlq-progress ";
const TITLE_PREFIX: &str = "ytdlq-title ";
const FILE_PREFIX: &str = "ytdlq-file ";

const PROGRESS_TEMPLATE: &str = "download:ytdlq-progress %(progress.downloaded_bytes)s %(progress.total_bytes,progress.total_bytes_estimate)s";
const PRINT_TITLE: &str = "after_move:ytdlq-title %(playlist_title,title)s";
const PRINT_FILE: &str = "after_move:ytdlq-file %(filepath)s";

/// Stderr fragments that mean the source refuses access.
const ACCESS_DENIED_MARKERS: &[&str] = &[
    "http error 403",
    "private video",
    "sign in to confirm",
    "members-only",
    "available to this channel's members",
    "not available in your country",
    "confirm your age",
    "requested content is not available",
];

/// Stderr fragments that mean the URL itself is unusable.
const INVALID_URL_MARKERS: &[&str] = &[
    "unsupported url",
    "is not a valid url",
    "http error 404",
    "video unavailable",
    "this video has been removed",
    "incomplete youtube id",
    "the playlist does not exist",
];

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout"];

/// Download options applied to every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YtDlpOptions {
    /// Netscape-format cookies file.
    pub cookies_file: Option<PathBuf>,
    /// Bandwidth limit in yt-dlp syntax, e.g. `2M`.
    pub rate_limit: Option<String>,
    /// MP3 bitrate in kbps.
    pub audio_quality: u32,
    /// Skip files larger than this many bytes.
    pub max_filesize: Option<u64>,
    /// Save the thumbnail next to the media file.
    pub write_thumbnail: bool,
    /// Save the video metadata as `.info.json`.
    pub write_info_json: bool,
    /// Embed the thumbnail as cover art.
    pub embed_thumbnail: bool,
    /// Embed chapter markers.
    pub embed_chapters: bool,
}

impl Default for YtDlpOptions {
    fn default() -> Self {
        Self {
            cookies_file: None,
            rate_limit: None,
            audio_quality: DEFAULT_AUDIO_QUALITY,
            max_filesize: None,
            write_thumbnail: false,
            write_info_json: false,
            embed_thumbnail: false,
            embed_chapters: true,
        }
    }
}

/// Runs downloads through an external `yt-dlp` process.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: PathBuf,
    options: YtDlpOptions,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpFetcher {
    /// Uses `yt-dlp` from `PATH` with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_YT_DLP),
            options: YtDlpOptions::default(),
        }
    }

    /// Uses a specific binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Replaces every download option.
    #[must_use]
    pub fn with_options(mut self, options: YtDlpOptions) -> Self {
        self.options = options;
        self
    }

    /// Passes a Netscape-format cookies file to every invocation.
    #[must_use]
    pub fn with_cookies_file(mut self, path: Option<PathBuf>) -> Self {
        self.options.cookies_file = path;
        self
    }

    /// Limits download bandwidth (yt-dlp syntax, e.g. `2M`).
    #[must_use]
    pub fn with_rate_limit(mut self, rate: Option<String>) -> Self {
        self.options.rate_limit = rate;
        self
    }

    /// The binary this fetcher runs.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn options(&self) -> &YtDlpOptions {
        &self.options
    }

    /// Builds the argument list for one request. The URL is always last,
    /// after `--`.
    #[must_use]
    pub fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let options = &self.options;
        let mut args: Vec<String> = [
            "--no-simulate",
            "--newline",
            "--progress",
            "--progress-template",
            PROGRESS_TEMPLATE,
            "--print",
            PRINT_TITLE,
            "--print",
            PRINT_FILE,
        ]
        .map(String::from)
        .to_vec();

        args.push(
            match request.kind {
                MediaKind::Video => "--no-playlist",
                MediaKind::Playlist => "--yes-playlist",
            }
            .into(),
        );

        args.push("-f".into());
        args.push(format_selector(request));
        match request.format {
            OutputFormat::Mp3 => {
                args.extend(["-x", "--audio-format", "mp3", "--audio-quality"].map(String::from));
                args.push(format!("{}K", options.audio_quality));
            }
            OutputFormat::Mp4 => {
                args.extend(["--merge-output-format", "mp4"].map(String::from));
            }
        }

        args.push("-o".into());
        args.push(output_template(request));

        if let Some(bytes) = options.max_filesize {
            args.push("--max-filesize".into());
            args.push(bytes.to_string());
        }
        if options.write_thumbnail {
            args.push("--write-thumbnail".into());
        }
        if options.write_info_json {
            args.push("--write-info-json".into());
        }
        if options.embed_thumbnail {
            args.push("--embed-thumbnail".into());
        }
        if options.embed_chapters {
            args.push("--embed-chapters".into());
        }
        if let Some(cookies) = &options.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.to_string_lossy().into_owned());
        }
        if let Some(rate) = &options.rate_limit {
            args.push("--limit-rate".into());
            args.push(rate.clone());
        }

        args.push("--".into());
        args.push(request.url.clone());
        args
    }
}

/// yt-dlp `-f` selector for a request.
#[must_use]
pub fn format_selector(request: &FetchRequest) -> String {
    if request.format.is_audio_only() {
        return "ba[ext=m4a]/ba/b".to_string();
    }
    match request.resolution {
        Some(res) => {
            let h = res.height();
            format!("bv*[height<={h}][ext=mp4]+ba[ext=m4a]/b[height<={h}][ext=mp4]/bv*+ba/b")
        }
        None => "bv*[ext=mp4]+ba[ext=m4a]/b[ext=mp4]/bv*+ba/b".to_string(),
    }
}

fn output_template(request: &FetchRequest) -> String {
    let template = match (&request.output_template, request.kind) {
        (Some(custom), _) => custom.as_str(),
        (None, MediaKind::Video) => VIDEO_TEMPLATE,
        (None, MediaKind::Playlist) => PLAYLIST_TEMPLATE,
    };
    request
        .destination
        .join(template)
        .to_string_lossy()
        .into_owned()
}

/// Maps yt-dlp stderr to an error kind. Unknown failures are transient.
#[must_use]
pub fn classify_stderr(stderr: &str) -> FetchErrorKind {
    let lowered = stderr.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    if has(ACCESS_DENIED_MARKERS) {
        FetchErrorKind::PermanentAccessDenied
    } else if has(INVALID_URL_MARKERS) {
        FetchErrorKind::PermanentInvalidUrl
    } else if has(TIMEOUT_MARKERS) {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Transient
    }
}

/// Percentage from a `--progress-template` line. `None` when the line is not
/// a progress line; `Some(None)` when yt-dlp does not know the total yet.
fn parse_progress(line: &str) -> Option<Option<f32>> {
    let fields = line.trim().strip_prefix(PROGRESS_PREFIX.trim_end())?;
    let mut fields = fields.split_whitespace();
    let downloaded = fields.next().and_then(|v| v.parse::<f64>().ok());
    let total = fields.next().and_then(|v| v.parse::<f64>().ok());
    Some(match (downloaded, total) {
        (Some(done), Some(total)) if total > 0.0 => {
            #[allow(clippy::cast_possible_truncation)]
            let percent = (done / total * 100.0) as f32;
            Some(percent)
        }
        _ => None,
    })
}

/// Reads `reader` to the end, reporting progress lines and keeping the rest.
async fn drain_lines<R: AsyncRead + Unpin>(
    reader: R,
    progress: &ProgressReporter,
) -> std::io::Result<Vec<String>> {
    let mut lines = BufReader::new(reader).lines();
    let mut kept = Vec::new();
    while let Some(line) = lines.next_line().await? {
        match parse_progress(&line) {
            Some(Some(percent)) => progress.report(percent),
            Some(None) => {}
            None => kept.push(line),
        }
    }
    Ok(kept)
}

/// Picks the most useful line of stderr for the item's `last_error`.
fn error_message(stderr: &[String], status: ExitStatus) -> String {
    let lines = stderr.iter().map(|l| l.trim()).filter(|l| !l.is_empty());
    lines
        .clone()
        .filter(|l| l.starts_with("ERROR:"))
        .last()
        .or_else(|| lines.last())
        .map_or_else(|| format!("yt-dlp exited with {status}"), str::to_string)
}

/// File path and title from the `--print` lines on stdout. Unmarked lines are
/// read as bare paths.
fn parse_output(stdout: &[String], request: &FetchRequest) -> FetchOutput {
    let mut files = Vec::new();
    let mut titles = Vec::new();
    let mut bare = Vec::new();
    for line in stdout.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if let Some(file) = line.strip_prefix(FILE_PREFIX) {
            files.push(file);
        } else if let Some(title) = line.strip_prefix(TITLE_PREFIX) {
            titles.push(title);
        } else {
            bare.push(line);
        }
    }
    if files.is_empty() {
        files = bare;
    }

    let path = match request.kind {
        MediaKind::Video => files
            .last()
            .map_or_else(|| request.destination.clone(), PathBuf::from),
        MediaKind::Playlist => files
            .first()
            .and_then(|first| Path::new(first).parent().map(Path::to_path_buf))
            .unwrap_or_else(|| request.destination.clone()),
    };
    let title = match request.kind {
        MediaKind::Video => titles.last(),
        MediaKind::Playlist => titles.first(),
    }
    .filter(|t| **t != "NA")
    .map(|t| (*t).to_string());

    FetchOutput { path, title }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    #[instrument(skip(self, request, cancel, progress), fields(url = %request.url, format = %request.format))]
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: CancelToken,
        progress: ProgressReporter,
    ) -> Result<FetchOutput, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled());
        }

        let args = self.build_args(request);
        debug!(program = %self.program.display(), ?args, "spawning yt-dlp");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!(program = %self.program.display(), error = %e, "failed to start yt-dlp");
                FetchError::transient(format!(
                    "failed to start {}: {e}",
                    self.program.display()
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::transient("yt-dlp stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::transient("yt-dlp stderr unavailable"))?;

        let read_both = async {
            let (out, err) = tokio::join!(
                drain_lines(stdout, &progress),
                drain_lines(stderr, &progress)
            );
            Ok::<_, std::io::Error>((out?, err?))
        };

        let (out, err) = tokio::select! {
            output = read_both => {
                output.map_err(|e| FetchError::transient(format!("reading yt-dlp output: {e}")))?
            }
            () = cancel.cancelled() => {
                debug!("cancel requested, killing yt-dlp");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill yt-dlp");
                }
                let _ = child.wait().await;
                return Err(FetchError::cancelled());
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::transient(format!("waiting for yt-dlp: {e}")))?;

        if status.success() {
            let output = parse_output(&out, request);
            debug!(path = %output.path.display(), title = ?output.title, "yt-dlp finished");
            Ok(output)
        } else {
            let joined = err.join("\n");
            let kind = classify_stderr(&joined);
            let message = error_message(&err, status);
            debug!(%kind, %message, "yt-dlp failed");
            Err(FetchError::new(kind, message))
        }
    }
}
