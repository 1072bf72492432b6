//! SqliteQueueStore - 本番用のキュー正本
//!
//! claim は `UPDATE ... WHERE id IN (SELECT ... LIMIT ?) RETURNING` の 1 文で行います。
//! SQLite の書き込みロックがこの 1 文を直列化するので、複数プロセスから claim しても
//! 同じ行を 2 回返すことはありません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use super::{from_millis, from_millis_opt, parse_id, to_millis, to_u32};
use crate::domain::{
    Metadata, QueueItem, QueueItemId, QueueStats, QueueStatus, QueueStatusCounts, WorkerId,
};
use crate::error::{HeraldError, HeraldResult};
use crate::ports::QueueStore;
use crate::queue::RetryPolicy;

const COLUMNS: &str = "id, notification_id, priority, scheduled_for, attempts, max_attempts, \
     status, error_message, processing_started_at, processing_completed_at, worker_id, \
     metadata, created_at, updated_at";

#[derive(Debug, FromRow)]
struct QueueItemRow {
    id: String,
    notification_id: String,
    priority: i64,
    scheduled_for: i64,
    attempts: i64,
    max_attempts: i64,
    status: String,
    error_message: Option<String>,
    processing_started_at: Option<i64>,
    processing_completed_at: Option<i64>,
    worker_id: Option<String>,
    metadata: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = HeraldError;

    fn try_from(row: QueueItemRow) -> Result<Self, Self::Error> {
        let priority = u8::try_from(row.priority)
            .map_err(|_| HeraldError::Corrupt(format!("priority out of range: {}", row.priority)))?;
        let status = row.status.parse::<QueueStatus>().map_err(HeraldError::Corrupt)?;
        let metadata: Metadata = serde_json::from_str(&row.metadata)?;

        Ok(QueueItem {
            id: parse_id(&row.id)?,
            notification_id: parse_id(&row.notification_id)?,
            priority,
            scheduled_for: from_millis(row.scheduled_for)?,
            attempts: to_u32(row.attempts, "attempts")?,
            max_attempts: to_u32(row.max_attempts, "max_attempts")?,
            status,
            error_message: row.error_message,
            processing_started_at: from_millis_opt(row.processing_started_at)?,
            processing_completed_at: from_millis_opt(row.processing_completed_at)?,
            worker_id: row.worker_id.map(WorkerId::new),
            metadata,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

fn into_items(rows: Vec<QueueItemRow>) -> HeraldResult<Vec<QueueItem>> {
    rows.into_iter().map(QueueItem::try_from).collect()
}

#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, item: &QueueItem) -> HeraldResult<()> {
        let metadata = serde_json::to_string(&item.metadata)?;
        sqlx::query(
            "INSERT INTO notification_queue
             (id, notification_id, priority, scheduled_for, attempts, max_attempts, status,
              error_message, processing_started_at, processing_completed_at, worker_id,
              metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id.to_storage())
        .bind(item.notification_id.to_storage())
        .bind(i64::from(item.priority))
        .bind(to_millis(item.scheduled_for))
        .bind(i64::from(item.attempts))
        .bind(i64::from(item.max_attempts))
        .bind(item.status.as_str())
        .bind(item.error_message.as_deref())
        .bind(item.processing_started_at.map(to_millis))
        .bind(item.processing_completed_at.map(to_millis))
        .bind(item.worker_id.as_ref().map(WorkerId::as_str))
        .bind(metadata)
        .bind(to_millis(item.created_at))
        .bind(to_millis(item.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: QueueItemId) -> HeraldResult<Option<QueueItem>> {
        let row: Option<QueueItemRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM notification_queue WHERE id = ?"))
                .bind(id.to_storage())
                .fetch_optional(&self.pool)
                .await?;
        row.map(QueueItem::try_from).transpose()
    }

    async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: u32,
        offset: u32,
    ) -> HeraldResult<Vec<QueueItem>> {
        let status = status.map(QueueStatus::as_str);
        let rows: Vec<QueueItemRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM notification_queue
             WHERE (? IS NULL OR status = ?)
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(status)
        .bind(status)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        into_items(rows)
    }

    async fn claim(
        &self,
        worker: &WorkerId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> HeraldResult<Vec<QueueItem>> {
        let now_ms = to_millis(now);
        let rows: Vec<QueueItemRow> = sqlx::query_as(&format!(
            "UPDATE notification_queue
             SET status = 'processing',
                 processing_started_at = ?,
                 processing_completed_at = NULL,
                 worker_id = ?,
                 updated_at = ?
             WHERE id IN (
                 SELECT id FROM notification_queue
                 WHERE status = 'pending' AND scheduled_for <= ?
                 ORDER BY priority ASC, scheduled_for ASC, created_at ASC, id ASC
                 LIMIT ?
             )
             RETURNING {COLUMNS}"
        ))
        .bind(now_ms)
        .bind(worker.as_str())
        .bind(now_ms)
        .bind(now_ms)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        // RETURNING order is unspecified
        let mut items = into_items(rows)?;
        items.sort_by(|a, b| {
            (a.priority, a.scheduled_for, a.created_at, a.id)
                .cmp(&(b.priority, b.scheduled_for, b.created_at, b.id))
        });
        Ok(items)
    }

    async fn complete(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<QueueItem>> {
        let now_ms = to_millis(now);
        let row: Option<QueueItemRow> = sqlx::query_as(&format!(
            "UPDATE notification_queue
             SET status = 'completed',
                 processing_completed_at = ?,
                 worker_id = NULL,
                 updated_at = ?
             WHERE id = ? AND status = 'processing' AND worker_id = ?
             RETURNING {COLUMNS}"
        ))
        .bind(now_ms)
        .bind(now_ms)
        .bind(id.to_storage())
        .bind(worker.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueueItem::try_from).transpose()
    }

    async fn renew_lease(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<QueueItem>> {
        let now_ms = to_millis(now);
        let row: Option<QueueItemRow> = sqlx::query_as(&format!(
            "UPDATE notification_queue
             SET processing_started_at = ?,
                 updated_at = ?
             WHERE id = ? AND status = 'processing' AND worker_id = ?
             RETURNING {COLUMNS}"
        ))
        .bind(now_ms)
        .bind(now_ms)
        .bind(id.to_storage())
        .bind(worker.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueueItem::try_from).transpose()
    }

    async fn fail(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        error: &str,
        now: DateTime<Utc>,
        retry: &RetryPolicy,
    ) -> HeraldResult<Option<QueueItem>> {
        let now_ms = to_millis(now);
        let mut tx = self.pool.begin().await?;

        // SET expressions see the pre-update row, so both CASE and
        // `attempts + 1` use the old attempts value.
        let row: Option<QueueItemRow> = sqlx::query_as(&format!(
            "UPDATE notification_queue
             SET attempts = attempts + 1,
                 status = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END,
                 error_message = ?,
                 processing_completed_at = ?,
                 worker_id = NULL,
                 updated_at = ?
             WHERE id = ? AND status = 'processing' AND worker_id = ?
             RETURNING {COLUMNS}"
        ))
        .bind(error)
        .bind(now_ms)
        .bind(now_ms)
        .bind(id.to_storage())
        .bind(worker.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let mut item = QueueItem::try_from(row)?;

        if item.status == QueueStatus::Pending {
            if let Some(at) = retry.next_run_at(item.attempts, now) {
                sqlx::query("UPDATE notification_queue SET scheduled_for = ? WHERE id = ?")
                    .bind(to_millis(at))
                    .bind(id.to_storage())
                    .execute(&mut *tx)
                    .await?;
                item.scheduled_for = at;
            }
        }

        tx.commit().await?;
        Ok(Some(item))
    }

    async fn cancel(&self, id: QueueItemId, now: DateTime<Utc>) -> HeraldResult<Option<QueueItem>> {
        let row: Option<QueueItemRow> = sqlx::query_as(&format!(
            "UPDATE notification_queue
             SET status = 'cancelled', worker_id = NULL, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'processing')
             RETURNING {COLUMNS}"
        ))
        .bind(to_millis(now))
        .bind(id.to_storage())
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueueItem::try_from).transpose()
    }

    async fn sweep(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> HeraldResult<u64> {
        let result = sqlx::query(
            "UPDATE notification_queue
             SET status = 'pending',
                 worker_id = NULL,
                 processing_started_at = NULL,
                 updated_at = ?
             WHERE status = 'processing' AND processing_started_at < ?",
        )
        .bind(to_millis(now))
        .bind(to_millis(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self, since: DateTime<Utc>) -> HeraldResult<QueueStats> {
        let since_ms = to_millis(since);

        let grouped: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM notification_queue
             WHERE created_at >= ?
             GROUP BY status",
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueStatusCounts::default();
        for (status, n) in grouped {
            let status = status.parse::<QueueStatus>().map_err(HeraldError::Corrupt)?;
            counts.add(status, n.max(0) as u64);
        }

        let (avg_processing, avg_attempts): (Option<f64>, Option<f64>) = sqlx::query_as(
            "SELECT
                 AVG(CASE
                     WHEN status = 'completed'
                      AND processing_started_at IS NOT NULL
                      AND processing_completed_at IS NOT NULL
                     THEN (processing_completed_at - processing_started_at) / 1000.0
                 END),
                 AVG(attempts)
             FROM notification_queue
             WHERE created_at >= ?",
        )
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats::new(since, counts, avg_processing, avg_attempts))
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> HeraldResult<u64> {
        let result = sqlx::query(
            "DELETE FROM notification_queue
             WHERE status IN ('completed', 'failed', 'cancelled') AND created_at < ?",
        )
        .bind(to_millis(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
