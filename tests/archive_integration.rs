//! Integration tests for the download archive and its interaction with the
//! queue across process restarts.

mod support;

use std::sync::Arc;

use tempfile::TempDir;
use ytdl_queue::{Archive, EnqueueRequest, MediaKind, QueueError, QueueManager, SourceId};

use support::{ScriptedFetcher, fast_config, wait_idle};

const VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

#[tokio::test]
async fn test_archived_source_is_duplicate_after_reopen() {
    let dir = TempDir::new().unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let queue = QueueManager::open(fast_config(dir.path()), fetcher.clone())
        .await
        .unwrap();
    queue
        .enqueue(EnqueueRequest::new(VIDEO, dir.path()))
        .await
        .unwrap();
    queue.start().await;
    wait_idle(&queue).await;
    queue.shutdown().await;
    drop(queue);

    let queue = QueueManager::open(fast_config(dir.path()), fetcher.clone())
        .await
        .unwrap();
    let err = queue
        .enqueue(EnqueueRequest::new("https://youtu.be/dQw4w9WgXcQ", dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Duplicate { .. }));
    assert!(
        err.to_string().contains("--force"),
        "duplicate error should suggest --force: {err}"
    );

    // forcing re-downloads and leaves a single archive entry
    queue
        .enqueue(EnqueueRequest::new(VIDEO, dir.path()).with_force(true))
        .await
        .unwrap();
    queue.start().await;
    wait_idle(&queue).await;
    queue.shutdown().await;

    assert_eq!(fetcher.calls_for(VIDEO), 2);
    let archive = Archive::open(dir.path().join("archive.txt")).await.unwrap();
    assert_eq!(archive.len(), 1);
}

#[tokio::test]
async fn test_archive_reads_plain_yt_dlp_archive_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.txt");
    std::fs::write(
        &path,
        "youtube dQw4w9WgXcQ\n# comment\n\nyoutube 9bZkp7q19f0 2025-01-01T00:00:00+00:00\n",
    )
    .unwrap();

    let archive = Archive::open(&path).await.unwrap();
    assert_eq!(archive.len(), 2);
    assert!(archive.contains(&SourceId::new("youtube", "dQw4w9WgXcQ")));
    let entries = archive.entries();
    let dated = entries
        .iter()
        .find(|entry| entry.source.id() == "9bZkp7q19f0")
        .unwrap();
    assert!(dated.completed_at.is_some());
}

#[tokio::test]
async fn test_archive_record_appends_and_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("archive.txt");

    let mut archive = Archive::open(&path).await.unwrap();
    assert!(archive.is_empty());
    let source = SourceId::new("youtube", "kJQP7kiw5Fk");
    archive.record(&source, chrono::Utc::now()).await.unwrap();
    archive.record(&source, chrono::Utc::now()).await.unwrap();

    let reopened = Archive::open(&path).await.unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.contains(&source));
    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 1, "recording twice appends once");
}

#[tokio::test]
async fn test_archive_remove_allows_redownload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.txt");
    let source = SourceId::new("youtube", "dQw4w9WgXcQ");

    let mut archive = Archive::open(&path).await.unwrap();
    archive.record(&source, chrono::Utc::now()).await.unwrap();
    assert!(archive.remove(&source).await.unwrap());
    assert!(!archive.remove(&source).await.unwrap());
    drop(archive);

    let fetcher = Arc::new(ScriptedFetcher::new());
    let queue = QueueManager::open(fast_config(dir.path()), fetcher)
        .await
        .unwrap();
    queue
        .enqueue(EnqueueRequest::new(VIDEO, dir.path()))
        .await
        .unwrap();
    queue.shutdown().await;
}

#[tokio::test]
async fn test_forget_through_queue_allows_reenqueue() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let queue = QueueManager::open(fast_config(dir.path()), fetcher.clone())
        .await
        .unwrap();
    queue
        .enqueue(EnqueueRequest::new(VIDEO, dir.path()))
        .await
        .unwrap();
    queue.start().await;
    wait_idle(&queue).await;
    assert_eq!(queue.archived_count().await, 1);
    queue.clear_finished().await;

    // any URL form of the same video resolves to the archived source
    assert!(
        queue
            .forget("https://youtu.be/dQw4w9WgXcQ", MediaKind::Video)
            .await
            .unwrap()
    );
    assert!(!queue.forget(VIDEO, MediaKind::Video).await.unwrap());
    assert_eq!(queue.archived_count().await, 0);

    queue
        .enqueue(EnqueueRequest::new(VIDEO, dir.path()))
        .await
        .unwrap();
    queue.start().await;
    wait_idle(&queue).await;
    queue.shutdown().await;
    assert_eq!(fetcher.calls_for(VIDEO), 2);

    let archive = Archive::open(dir.path().join("archive.txt")).await.unwrap();
    assert_eq!(archive.len(), 1);
}

#[tokio::test]
async fn test_forget_rejects_unusable_url() {
    let dir = TempDir::new().unwrap();
    let queue = QueueManager::open(fast_config(dir.path()), Arc::new(ScriptedFetcher::new()))
        .await
        .unwrap();
    let err = queue
        .forget("not a url", MediaKind::Video)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidRequest(_)));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_clear_archive_reports_removed_count() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.txt");
    let mut archive = Archive::open(&path).await.unwrap();
    for id in ["dQw4w9WgXcQ", "9bZkp7q19f0"] {
        archive
            .record(&SourceId::new("youtube", id), chrono::Utc::now())
            .await
            .unwrap();
    }
    drop(archive);

    let queue = QueueManager::open(fast_config(dir.path()), Arc::new(ScriptedFetcher::new()))
        .await
        .unwrap();
    assert_eq!(queue.clear_archive().await.unwrap(), 2);
    assert_eq!(queue.archived_count().await, 0);
    queue
        .enqueue(EnqueueRequest::new(VIDEO, dir.path()))
        .await
        .unwrap();
    queue.shutdown().await;
    assert!(Archive::open(&path).await.unwrap().is_empty());
}
