//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use ytdl_queue::config::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use ytdl_queue::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, OutputFormat, PausePolicy, Resolution};

/// Queue and download videos, playlists and audio with yt-dlp.
///
/// URLs already in the download archive are skipped. Transient failures are
/// retried with exponential backoff. Ctrl-C pauses the queue; run again to
/// pick up where it stopped.
#[derive(Parser, Debug, Clone)]
#[command(name = "ytdl-queue")]
#[command(author, version, about)]
pub struct Args {
    /// Video or playlist URLs (read from stdin, one per line, when omitted)
    pub urls: Vec<String>,

    /// Treat URLs as playlists and download every entry
    #[arg(short = 'p', long)]
    pub playlist: bool,

    /// Output format: mp4 (video) or mp3 (audio only)
    #[arg(short = 'f', long, default_value = "mp4")]
    pub format: OutputFormat,

    /// Maximum video height: 2160, 1440, 1080, 720, 480 or 360 (best available when omitted)
    #[arg(short = 'R', long)]
    pub resolution: Option<Resolution>,

    /// Directory to download into (default: current directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// yt-dlp output template, relative to the output directory
    #[arg(short = 't', long)]
    pub template: Option<String>,

    /// Maximum concurrent downloads (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(MIN_CONCURRENCY as i64..=MAX_CONCURRENCY as i64))]
    pub concurrency: u8,

    /// Maximum attempts per download, including the first (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Download even if the source is already in the archive
    #[arg(long)]
    pub force: bool,

    /// Download archive file (default: <output-dir>/.ytdl-queue/archive.txt)
    #[arg(long)]
    pub archive: Option<PathBuf>,

    /// Queue state database (default: <output-dir>/.ytdl-queue/state.db)
    #[arg(long)]
    pub state_db: Option<PathBuf>,

    /// Per-attempt timeout in seconds (1-86400, default 1800)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    pub timeout: Option<u64>,

    /// What Ctrl-C does to running downloads: finish or interrupt
    #[arg(long, default_value = "finish")]
    pub pause_policy: PausePolicy,

    /// Re-queue failed items from a previous run before starting
    #[arg(long)]
    pub retry_failed: bool,

    /// Resume a queue a previous run left paused (with restore_paused = true)
    #[arg(long)]
    pub resume: bool,

    /// Netscape-format cookies file passed to yt-dlp
    #[arg(long)]
    pub cookies: Option<PathBuf>,

    /// Bandwidth limit passed to yt-dlp (e.g. 2M)
    #[arg(long)]
    pub limit_rate: Option<String>,

    /// MP3 bitrate in kbps (32-320, default 192)
    #[arg(long, value_name = "KBPS", value_parser = clap::value_parser!(u32).range(32..=320))]
    pub audio_quality: Option<u32>,

    /// Skip files larger than this many bytes
    #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_filesize: Option<u64>,

    /// Save the thumbnail next to each download
    #[arg(long)]
    pub write_thumbnail: bool,

    /// Save yt-dlp's metadata JSON next to each download
    #[arg(long)]
    pub write_info_json: bool,

    /// Embed the thumbnail as cover art
    #[arg(long)]
    pub embed_thumbnail: bool,

    /// Do not embed chapter markers
    #[arg(long)]
    pub no_embed_chapters: bool,

    /// Remove a URL's source from the download archive before queueing (repeatable)
    #[arg(long, value_name = "URL")]
    pub forget: Vec<String>,

    /// Path to the yt-dlp binary
    #[arg(long)]
    pub yt_dlp: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/ytdl-queue/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the final queue as JSON instead of a text summary
    #[arg(long)]
    pub json: bool,

    /// Disable colored log output
    #[arg(long)]
    pub no_color: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
