use std::collections::HashSet;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use ytdl_queue::{
    EnqueueRequest, ItemId, ItemStatus, MediaKind, QueueConfig, QueueError, QueueManager,
    RetryPolicy, YtDlpFetcher, YtDlpOptions,
};

use crate::ProcessExit;
use crate::app::config_manager::{self, ResolvedConfig};
use crate::app::summary::{self, RunReport};
use crate::app::{config_runtime, exit_handler, input_processor, progress_manager, terminal};
use crate::cli::Args;

/// Per-output-directory folder holding the archive and the state database.
pub(crate) const STATE_DIR_NAME: &str = ".ytdl-queue";

const BACKOFF_MULTIPLIER: f32 = 2.0;

pub(crate) async fn run_queue() -> Result<ProcessExit> {
    let (cli, cli_sources) = config_runtime::parse_cli_with_sources();
    let resolved = config_manager::resolve_config(&cli, &cli_sources)?;

    let default_level = config_runtime::resolve_default_log_level(&resolved.args);
    let force_cli_log_level = config_runtime::should_force_cli_log_level(&cli_sources);
    let no_color = terminal::is_no_color_requested(&resolved.args);
    terminal::init_tracing(default_level, force_cli_log_level, no_color);

    debug!(config_path = ?resolved.config_path, "configuration resolved");

    let args = &resolved.args;
    let output_dir = args.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let state_db = args
        .state_db
        .clone()
        .unwrap_or_else(|| output_dir.join(STATE_DIR_NAME).join("state.db"));

    let input = input_processor::collect_urls(&args.urls)?;
    if input.urls.is_empty() && args.forget.is_empty() && !state_db.exists() {
        summary::print_quick_start_guidance(input.piped_stdin_was_empty);
        return Ok(ProcessExit::Success);
    }

    if !output_dir.exists() {
        fs::create_dir_all(&output_dir).with_context(|| {
            format!("Failed to create output directory '{}'", output_dir.display())
        })?;
        info!(dir = %output_dir.display(), "Created output directory");
    }

    let config = build_queue_config(&resolved, &output_dir, state_db);
    let fetcher = build_fetcher(args);
    debug!(program = %fetcher.program().display(), "using yt-dlp");
    let queue = QueueManager::open(config, Arc::new(fetcher))
        .await
        .context("Failed to open download queue")?;

    let forget_rejected = forget_urls(&queue, args).await?;

    let cleared = queue.clear_finished().await;
    if cleared > 0 {
        debug!(cleared, "dropped finished items from the previous run");
    }
    if args.retry_failed {
        let report = queue.retry_failed().await;
        for id in &report.exhausted {
            if let Some(item) = queue.get(*id) {
                warn!(item_id = id, url = %item.url, "no attempts left, not retrying");
            }
        }
    }

    // pending items left by an earlier run belong to this run too
    let mut run_ids: HashSet<ItemId> = queue
        .items_with_status(ItemStatus::Pending)
        .iter()
        .map(|item| item.id)
        .collect();
    if !run_ids.is_empty() {
        info!(pending = run_ids.len(), "Resuming queued downloads");
    }

    let mut outcome = enqueue_urls(&queue, args, &output_dir, &input.urls).await?;
    outcome.rejected += forget_rejected;
    run_ids.extend(outcome.enqueued.iter().copied());

    if queue.status().paused {
        if args.resume {
            queue.resume().await;
        } else {
            warn!("Queue was left paused by a previous run; pass --resume to continue");
        }
    }

    let interrupted = if run_ids.is_empty() || queue.status().paused {
        false
    } else {
        drive_queue(&queue, args).await
    };

    queue.shutdown().await;

    let report = RunReport::new(
        &queue.status(),
        &run_ids,
        outcome.duplicates,
        outcome.rejected,
        interrupted,
    );
    info!(
        completed = report.counts.completed,
        failed = report.counts.failed,
        cancelled = report.counts.cancelled,
        pending = report.counts.pending,
        "Queue run finished"
    );
    summary::print_report(&report, args.json)?;

    if interrupted {
        warn!(
            pending = report.counts.pending,
            "Interrupted. Run again to resume."
        );
    }

    Ok(exit_handler::outcome_for_run(
        &report.counts,
        outcome.rejected,
        interrupted,
    ))
}

fn build_queue_config(resolved: &ResolvedConfig, output_dir: &Path, state_db: PathBuf) -> QueueConfig {
    let args = &resolved.args;
    let archive = args
        .archive
        .clone()
        .unwrap_or_else(|| output_dir.join(STATE_DIR_NAME).join("archive.txt"));
    let retry = RetryPolicy::new(
        u32::from(args.max_retries),
        resolved.retry.base_delay,
        resolved.retry.max_delay,
        BACKOFF_MULTIPLIER,
    );

    let mut config = QueueConfig::new(archive)
        .with_state_db(Some(state_db))
        .with_concurrency(usize::from(args.concurrency))
        .with_retry_policy(retry)
        .with_pause_policy(args.pause_policy)
        .with_restore_paused(resolved.restore_paused);
    if let Some(secs) = args.timeout {
        config = config.with_attempt_timeout(Duration::from_secs(secs));
    }
    config
}

fn build_fetcher(args: &Args) -> YtDlpFetcher {
    let defaults = YtDlpOptions::default();
    let options = YtDlpOptions {
        cookies_file: args.cookies.clone(),
        rate_limit: args.limit_rate.clone(),
        audio_quality: args.audio_quality.unwrap_or(defaults.audio_quality),
        max_filesize: args.max_filesize,
        write_thumbnail: args.write_thumbnail,
        write_info_json: args.write_info_json,
        embed_thumbnail: args.embed_thumbnail,
        embed_chapters: !args.no_embed_chapters,
    };
    let mut fetcher = YtDlpFetcher::new().with_options(options);
    if let Some(program) = &args.yt_dlp {
        fetcher = fetcher.with_program(program.clone());
    }
    fetcher
}

fn media_kind(args: &Args) -> MediaKind {
    if args.playlist {
        MediaKind::Playlist
    } else {
        MediaKind::Video
    }
}

/// Drops each `--forget` URL's source from the archive. Returns how many
/// URLs were unusable.
async fn forget_urls(queue: &QueueManager, args: &Args) -> Result<usize> {
    let mut rejected = 0;
    for url in &args.forget {
        match queue.forget(url, media_kind(args)).await {
            Ok(true) => info!(url = %url, "Removed from archive"),
            Ok(false) => warn!(url = %url, "Not in archive, nothing to forget"),
            Err(QueueError::InvalidRequest(error)) => {
                warn!(url = %url, error = %error, "Skipping invalid URL");
                rejected += 1;
            }
            Err(error) => return Err(error).context("Failed to update download archive"),
        }
    }
    Ok(rejected)
}

struct EnqueueOutcome {
    enqueued: Vec<ItemId>,
    duplicates: usize,
    rejected: usize,
}

async fn enqueue_urls(
    queue: &QueueManager,
    args: &Args,
    output_dir: &Path,
    urls: &[String],
) -> Result<EnqueueOutcome> {
    let kind = media_kind(args);
    let mut outcome = EnqueueOutcome {
        enqueued: Vec::new(),
        duplicates: 0,
        rejected: 0,
    };

    for url in urls {
        let request = EnqueueRequest::new(url.clone(), output_dir)
            .with_kind(kind)
            .with_format(args.format)
            .with_resolution(args.resolution)
            .with_output_template(args.template.clone())
            .with_force(args.force);
        match queue.enqueue(request).await {
            Ok(id) => outcome.enqueued.push(id),
            Err(QueueError::Duplicate { source_id }) => {
                info!(url = %url, source = %source_id, "Already downloaded or queued, skipping");
                outcome.duplicates += 1;
            }
            Err(QueueError::InvalidRequest(error)) => {
                warn!(url = %url, error = %error, "Skipping invalid URL");
                outcome.rejected += 1;
            }
            Err(error) => return Err(error).context("Failed to enqueue download"),
        }
    }
    Ok(outcome)
}

/// Runs the queue until it is idle. Returns `true` when Ctrl-C cut the run
/// short.
async fn drive_queue(queue: &QueueManager, args: &Args) -> bool {
    queue.start().await;

    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_spinner, queue.subscribe());

    let interrupted = tokio::select! {
        () = queue.wait_until_idle() => false,
        () = ctrl_c() => true,
    };

    if interrupted {
        warn!(policy = %args.pause_policy, "Interrupt received, pausing queue");
        queue.pause().await;
        // a second Ctrl-C stops running downloads too
        tokio::select! {
            () = queue.wait_until_idle() => {}
            () = ctrl_c() => warn!("Second interrupt, stopping running downloads"),
        }
    }

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }
    interrupted
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
