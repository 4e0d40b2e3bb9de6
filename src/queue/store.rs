//! Optional SQLite persistence of queue items and the paused flag.
//!
//! The in-memory queue is authoritative; the store mirrors every change so a
//! later process can pick the queue up again. Items that were InProgress when
//! the previous process stopped are loaded as Pending.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{debug, info, instrument};

use super::error::StoreError;
use super::item::{DownloadItem, ItemId, ItemStatus};
use crate::db::Database;
use crate::download::FetchErrorKind;
use crate::media::{MediaKind, OutputFormat, Resolution};
use crate::source::SourceId;

const PAUSED_FLAG: &str = "paused";

/// Queue state persisted across runs.
#[derive(Debug, Clone)]
pub struct QueueStore {
    db: Database,
}

/// What [`QueueStore::load`] found.
#[derive(Debug, Clone, Default)]
pub struct StoredQueue {
    /// Items in dispatch order.
    pub items: Vec<DownloadItem>,
    /// Whether the queue was paused when last saved.
    pub paused: bool,
    /// How many InProgress items were reset to Pending.
    pub recovered: usize,
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: i64,
    url: String,
    extractor: String,
    source_id: String,
    title: Option<String>,
    kind: String,
    format: String,
    resolution: Option<i64>,
    destination: String,
    output_template: Option<String>,
    status: String,
    attempts: i64,
    progress: f64,
    last_error: Option<String>,
    failure_kind: Option<String>,
    output_path: Option<String>,
    force: bool,
    position: i64,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::decode(format!("bad timestamp '{value}': {e}")))
}

fn parse_optional_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(parse_timestamp).transpose()
}

impl TryFrom<ItemRow> for DownloadItem {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let resolution = match row.resolution {
            None => None,
            Some(height) => Some(
                u32::try_from(height)
                    .ok()
                    .and_then(Resolution::from_height)
                    .ok_or_else(|| StoreError::decode(format!("bad resolution: {height}")))?,
            ),
        };
        let failure_kind = row
            .failure_kind
            .as_deref()
            .map(str::parse::<FetchErrorKind>)
            .transpose()
            .map_err(StoreError::decode)?;
        #[allow(clippy::cast_possible_truncation)]
        let progress = row.progress.clamp(0.0, 100.0) as f32;

        Ok(Self {
            id: row.id,
            url: row.url,
            source: SourceId::new(row.extractor, row.source_id),
            title: row.title,
            kind: row.kind.parse::<MediaKind>().map_err(StoreError::decode)?,
            format: row.format.parse::<OutputFormat>().map_err(StoreError::decode)?,
            resolution,
            destination: PathBuf::from(row.destination),
            output_template: row.output_template,
            status: row.status.parse::<ItemStatus>().map_err(StoreError::decode)?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            progress,
            last_error: row.last_error,
            failure_kind,
            next_eligible_at: None,
            output_path: row.output_path.map(PathBuf::from),
            force: row.force,
            created_at: parse_timestamp(&row.created_at)?,
            started_at: parse_optional_timestamp(row.started_at.as_deref())?,
            completed_at: parse_optional_timestamp(row.completed_at.as_deref())?,
            updated_at: parse_timestamp(&row.updated_at)?,
            position: row.position,
        })
    }
}

impl QueueStore {
    /// Opens (creating if needed) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::new(path).await?;
        Ok(Self { db })
    }

    /// An in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let db = Database::new_in_memory().await?;
        Ok(Self { db })
    }

    /// Wraps an already-open database.
    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    /// Loads every item in dispatch order, resetting InProgress items to
    /// Pending (their attempt is lost, so the count is rolled back).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a query fails or a row cannot be decoded.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<StoredQueue, StoreError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT id, url, extractor, source_id, title, kind, format, resolution, destination,
                    output_template, status, attempts, progress, last_error, failure_kind,
                    output_path, force, position, created_at, started_at, completed_at, updated_at
             FROM queue_items ORDER BY position, id",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut recovered = 0;
        for row in rows {
            let mut item = DownloadItem::try_from(row)?;
            if item.status == ItemStatus::InProgress {
                item.set_status(ItemStatus::Pending);
                item.attempts = item.attempts.saturating_sub(1);
                item.progress = 0.0;
                recovered += 1;
            }
            items.push(item);
        }

        let paused: Option<(String,)> =
            sqlx::query_as("SELECT value FROM queue_flags WHERE key = ?")
                .bind(PAUSED_FLAG)
                .fetch_optional(self.db.pool())
                .await?;
        let paused = paused.is_some_and(|(value,)| value == "true");

        if recovered > 0 {
            info!(recovered, "reset interrupted items to pending");
        }
        debug!(items = items.len(), paused, "loaded queue state");

        Ok(StoredQueue {
            items,
            paused,
            recovered,
        })
    }

    /// Inserts or replaces one item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    #[instrument(skip(self, item), fields(item_id = item.id, status = %item.status))]
    pub async fn upsert(&self, item: &DownloadItem) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO queue_items (id, url, extractor, source_id, title, kind, format,
                 resolution, destination, output_template, status, attempts, progress,
                 last_error, failure_kind, output_path, force, position, created_at,
                 started_at, completed_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 status = excluded.status,
                 attempts = excluded.attempts,
                 progress = excluded.progress,
                 last_error = excluded.last_error,
                 failure_kind = excluded.failure_kind,
                 output_path = excluded.output_path,
                 force = excluded.force,
                 position = excluded.position,
                 started_at = excluded.started_at,
                 completed_at = excluded.completed_at,
                 updated_at = excluded.updated_at",
        )
        .bind(item.id)
        .bind(&item.url)
        .bind(item.source.extractor())
        .bind(item.source.id())
        .bind(item.title.as_deref())
        .bind(item.kind.as_str())
        .bind(item.format.as_str())
        .bind(item.resolution.map(|r| i64::from(r.height())))
        .bind(item.destination.to_string_lossy().into_owned())
        .bind(item.output_template.as_deref())
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(f64::from(item.progress))
        .bind(item.last_error.as_deref())
        .bind(item.failure_kind.map(FetchErrorKind::as_str))
        .bind(
            item.output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(item.force)
        .bind(item.position)
        .bind(item.created_at.to_rfc3339())
        .bind(item.started_at.map(|at| at.to_rfc3339()))
        .bind(item.completed_at.map(|at| at.to_rfc3339()))
        .bind(item.updated_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Deletes items by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn remove(&self, ids: &[ItemId]) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM queue_items WHERE id = ?")
                .bind(*id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Persists the paused flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    #[instrument(skip(self))]
    pub async fn set_paused(&self, paused: bool) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO queue_flags (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(PAUSED_FLAG)
        .bind(if paused { "true" } else { "false" })
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Closes the underlying pool.
    pub async fn close(self) {
        self.db.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue::item::EnqueueRequest;

    fn item(id: ItemId, position: i64) -> DownloadItem {
        DownloadItem::from_request(
            id,
            position,
            SourceId::new("youtube", format!("video{id:06}ab")),
            EnqueueRequest::new("https://youtu.be/x", "/downloads")
                .with_format(OutputFormat::Mp3)
                .with_resolution(Some(Resolution::P720)),
        )
    }

    #[tokio::test]
    async fn test_upsert_and_load_preserves_order_and_fields() {
        let store = QueueStore::in_memory().await.unwrap();
        store.upsert(&item(2, 5)).await.unwrap();
        store.upsert(&item(1, 9)).await.unwrap();

        let loaded = store.load().await.unwrap();
        let ids: Vec<_> = loaded.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(loaded.items[0].format, OutputFormat::Mp3);
        assert_eq!(loaded.items[0].resolution, Some(Resolution::P720));
        assert!(!loaded.paused);
    }

    #[tokio::test]
    async fn test_upsert_updates_status() {
        let store = QueueStore::in_memory().await.unwrap();
        let mut it = item(1, 1);
        store.upsert(&it).await.unwrap();

        it.set_status(ItemStatus::Failed);
        it.attempts = 3;
        it.last_error = Some("boom".to_string());
        it.failure_kind = Some(FetchErrorKind::Transient);
        store.upsert(&it).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].status, ItemStatus::Failed);
        assert_eq!(loaded.items[0].attempts, 3);
        assert_eq!(loaded.items[0].failure_kind, Some(FetchErrorKind::Transient));
    }

    #[tokio::test]
    async fn test_upsert_keeps_title_progress_and_timestamps() {
        let store = QueueStore::in_memory().await.unwrap();
        let mut it = item(1, 1);
        it.mark_started();
        store.upsert(&it).await.unwrap();
        it.mark_completed(Some(PathBuf::from("/downloads/a.mp3")), Some("Song".to_string()));
        store.upsert(&it).await.unwrap();

        let loaded = store.load().await.unwrap();
        let restored = &loaded.items[0];
        assert_eq!(restored.title.as_deref(), Some("Song"));
        assert!((restored.progress - 100.0).abs() < f32::EPSILON);
        assert_eq!(
            restored.started_at.map(|at| at.timestamp_millis()),
            it.started_at.map(|at| at.timestamp_millis())
        );
        assert!(restored.completed_at.is_some());
        assert_eq!(restored.output_path, Some(PathBuf::from("/downloads/a.mp3")));
    }

    #[tokio::test]
    async fn test_load_resets_in_progress_to_pending() {
        let store = QueueStore::in_memory().await.unwrap();
        let mut it = item(1, 1);
        it.set_status(ItemStatus::InProgress);
        it.attempts = 2;
        it.progress = 55.0;
        store.upsert(&it).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.recovered, 1);
        assert_eq!(loaded.items[0].status, ItemStatus::Pending);
        assert_eq!(loaded.items[0].attempts, 1);
        assert!(loaded.items[0].progress.abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_paused_flag_roundtrip() {
        let store = QueueStore::in_memory().await.unwrap();
        store.set_paused(true).await.unwrap();
        assert!(store.load().await.unwrap().paused);
        store.set_paused(false).await.unwrap();
        assert!(!store.load().await.unwrap().paused);
    }

    #[tokio::test]
    async fn test_remove_deletes_rows() {
        let store = QueueStore::in_memory().await.unwrap();
        store.upsert(&item(1, 1)).await.unwrap();
        store.upsert(&item(2, 2)).await.unwrap();
        store.remove(&[1]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].id, 2);
    }
}
