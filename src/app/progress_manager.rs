//! Progress UI (spinner) for queue runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use url::Url;
use ytdl_queue::{DownloadItem, ItemStatus, QueueSnapshot};

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    snapshots: watch::Receiver<QueueSnapshot>,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(snapshots, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_spinner_inner(
    snapshots: watch::Receiver<QueueSnapshot>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            let message = progress_message(&snapshots.borrow());
            spinner.set_message(message);
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    })
}

fn progress_message(snapshot: &QueueSnapshot) -> String {
    let counts = &snapshot.counts;
    let done = counts.completed + counts.failed + counts.cancelled;
    let total = counts.total();

    if snapshot.paused {
        return format!("[{done}/{total}] Paused");
    }

    let running: Vec<&DownloadItem> = snapshot
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::InProgress)
        .collect();
    let Some(first) = running.first() else {
        return format!("[{done}/{total}] Waiting...");
    };

    let label = running_label(first);
    if running.len() > 1 {
        format!(
            "[{done}/{total}] {label} (+{} more)...",
            running.len() - 1
        )
    } else {
        format!("[{done}/{total}] {label}...")
    }
}

/// Names a running download by host, with its percentage once yt-dlp has
/// reported one.
fn running_label(item: &DownloadItem) -> String {
    let host = Url::parse(&item.url)
        .ok()
        .and_then(|url| url.host_str().map(ToString::to_string))
        .unwrap_or_else(|| "queue".to_string());
    if item.progress > 0.0 {
        format!("Downloading from {host} ({:.0}%)", item.progress)
    } else {
        format!("Downloading from {host}")
    }
}
