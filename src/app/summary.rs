//! End-of-run summary on stdout (text or JSON).

use std::collections::HashSet;
use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;
use ytdl_queue::{DownloadItem, ItemId, ItemStatus, QueueSnapshot, StatusCounts};

/// What one run did, restricted to the items it touched.
#[derive(Debug, Serialize)]
pub(crate) struct RunReport {
    pub(crate) counts: StatusCounts,
    /// URLs refused because their source was already archived or queued.
    pub(crate) duplicates: usize,
    /// URLs refused as unusable.
    pub(crate) rejected: usize,
    /// Failed items from earlier runs still in the queue.
    pub(crate) earlier_failed: usize,
    pub(crate) interrupted: bool,
    pub(crate) items: Vec<DownloadItem>,
}

impl RunReport {
    pub(crate) fn new(
        snapshot: &QueueSnapshot,
        run_ids: &HashSet<ItemId>,
        duplicates: usize,
        rejected: usize,
        interrupted: bool,
    ) -> Self {
        let items: Vec<DownloadItem> = snapshot
            .items
            .iter()
            .filter(|item| run_ids.contains(&item.id))
            .cloned()
            .collect();
        let earlier_failed = snapshot
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed && !run_ids.contains(&item.id))
            .count();
        Self {
            counts: StatusCounts::tally(&items),
            duplicates,
            rejected,
            earlier_failed,
            interrupted,
            items,
        }
    }
}

pub(crate) fn print_report(report: &RunReport, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, report)?;
        writeln!(out)?;
    } else {
        write_text(&mut out, report)?;
    }
    Ok(())
}

fn write_text(out: &mut impl Write, report: &RunReport) -> Result<()> {
    let counts = &report.counts;
    writeln!(
        out,
        "Downloaded {}, failed {}, cancelled {}, pending {}",
        counts.completed,
        counts.failed,
        counts.cancelled,
        counts.pending + counts.in_progress
    )?;
    if report.duplicates > 0 {
        writeln!(out, "Skipped {} already downloaded or queued", report.duplicates)?;
    }
    if report.rejected > 0 {
        writeln!(out, "Skipped {} invalid URL(s)", report.rejected)?;
    }

    for item in &report.items {
        if item.status == ItemStatus::Completed
            && let Some(title) = &item.title
        {
            writeln!(out, "  downloaded: {title}")?;
        }
    }
    for item in report
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::Failed)
    {
        let error = item.last_error.as_deref().unwrap_or("unknown error");
        writeln!(
            out,
            "  failed: {} ({} attempt(s)): {error}",
            item.url, item.attempts
        )?;
    }

    if report.interrupted && counts.pending + counts.in_progress > 0 {
        writeln!(out, "Interrupted. Run again to resume the remaining downloads.")?;
    }
    if report.earlier_failed > 0 {
        writeln!(
            out,
            "{} failed item(s) from earlier runs; use --retry-failed to try them again",
            report.earlier_failed
        )?;
    }
    Ok(())
}

pub(crate) fn print_quick_start_guidance(piped_stdin_was_empty: bool) {
    if piped_stdin_was_empty {
        println!("No URLs were found on stdin.");
    } else {
        println!("No URLs given.");
    }
    println!("Usage: ytdl-queue [OPTIONS] <URL>...");
    println!("Example: ytdl-queue -f mp3 https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    println!("         cat urls.txt | ytdl-queue -o ~/Videos");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ytdl_queue::{EnqueueRequest, QueueConfig, QueueManager};

    #[tokio::test]
    async fn test_report_only_counts_items_from_this_run() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueManager::open(
            QueueConfig::new(dir.path().join("archive.txt")),
            std::sync::Arc::new(ytdl_queue::YtDlpFetcher::new()),
        )
        .await
        .unwrap();
        let first = queue
            .enqueue(EnqueueRequest::new("https://youtu.be/dQw4w9WgXcQ", dir.path()))
            .await
            .unwrap();
        queue
            .enqueue(EnqueueRequest::new("https://vimeo.com/76979871", dir.path()))
            .await
            .unwrap();

        let run_ids = HashSet::from([first]);
        let report = RunReport::new(&queue.status(), &run_ids, 2, 1, false);
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.counts.pending, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.earlier_failed, 0);
        queue.shutdown().await;
    }

    #[test]
    fn test_text_summary_lists_failures_and_hints() {
        let report = RunReport {
            counts: StatusCounts {
                completed: 2,
                pending: 1,
                ..StatusCounts::default()
            },
            duplicates: 1,
            rejected: 0,
            earlier_failed: 3,
            interrupted: true,
            items: Vec::new(),
        };
        let mut buffer = Vec::new();
        write_text(&mut buffer, &report).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("Downloaded 2, failed 0, cancelled 0, pending 1"));
        assert!(text.contains("Skipped 1 already downloaded"));
        assert!(text.contains("Run again to resume"));
        assert!(text.contains("--retry-failed"));
    }

    #[tokio::test]
    async fn test_text_summary_names_downloaded_titles() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueManager::open(
            QueueConfig::new(dir.path().join("archive.txt")),
            std::sync::Arc::new(ytdl_queue::YtDlpFetcher::new()),
        )
        .await
        .unwrap();
        let id = queue
            .enqueue(EnqueueRequest::new("https://youtu.be/dQw4w9WgXcQ", dir.path()))
            .await
            .unwrap();
        let mut item = queue.get(id).unwrap();
        queue.shutdown().await;
        item.status = ItemStatus::Completed;
        item.title = Some("Never Gonna Give You Up".to_string());

        let report = RunReport {
            counts: StatusCounts::tally([&item]),
            duplicates: 0,
            rejected: 0,
            earlier_failed: 0,
            interrupted: false,
            items: vec![item],
        };
        let mut buffer = Vec::new();
        write_text(&mut buffer, &report).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("Downloaded 1, failed 0"));
        assert!(text.contains("  downloaded: Never Gonna Give You Up"));
    }
}
