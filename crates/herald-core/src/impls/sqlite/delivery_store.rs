//! SqliteDeliveryStore - 配送台帳の SQLite 実装
//!
//! 遷移規則は DeliveryRecord::apply が唯一の定義です。update は
//! 「読む → apply → (status, retry_count) が変わっていなければ書く」の
//! compare-and-set で行い、同時更新で retry_count を取りこぼしません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use super::{from_millis, from_millis_opt, parse_id, to_millis, to_u32};
use crate::domain::{
    DeliveryId, DeliveryRecord, DeliveryStats, DeliveryStatus, DeliveryStatusCounts,
    DeliveryUpdate,
};
use crate::error::{HeraldError, HeraldResult};
use crate::ports::DeliveryStore;

const COLUMNS: &str = "id, notification_id, email_address, status, sent_at, delivered_at, \
     failed_at, retry_count, max_retries, provider_message_id, error_message, created_at, updated_at";

#[derive(Debug, FromRow)]
struct DeliveryRow {
    id: String,
    notification_id: String,
    email_address: String,
    status: String,
    sent_at: Option<i64>,
    delivered_at: Option<i64>,
    failed_at: Option<i64>,
    retry_count: i64,
    max_retries: i64,
    provider_message_id: Option<String>,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = HeraldError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(DeliveryRecord {
            id: parse_id(&row.id)?,
            notification_id: parse_id(&row.notification_id)?,
            email_address: row.email_address,
            status: row.status.parse::<DeliveryStatus>().map_err(HeraldError::Corrupt)?,
            sent_at: from_millis_opt(row.sent_at)?,
            delivered_at: from_millis_opt(row.delivered_at)?,
            failed_at: from_millis_opt(row.failed_at)?,
            retry_count: to_u32(row.retry_count, "retry_count")?,
            max_retries: to_u32(row.max_retries, "max_retries")?,
            provider_message_id: row.provider_message_id,
            error_message: row.error_message,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteDeliveryStore {
    pool: SqlitePool,
}

impl SqliteDeliveryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> HeraldResult<Option<DeliveryRecord>> {
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM email_deliveries WHERE {column} = ?
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DeliveryRecord::try_from).transpose()
    }
}

#[async_trait]
impl DeliveryStore for SqliteDeliveryStore {
    async fn insert(&self, record: &DeliveryRecord) -> HeraldResult<()> {
        sqlx::query(
            "INSERT INTO email_deliveries
             (id, notification_id, email_address, status, sent_at, delivered_at, failed_at,
              retry_count, max_retries, provider_message_id, error_message, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_storage())
        .bind(record.notification_id.to_storage())
        .bind(&record.email_address)
        .bind(record.status.as_str())
        .bind(record.sent_at.map(to_millis))
        .bind(record.delivered_at.map(to_millis))
        .bind(record.failed_at.map(to_millis))
        .bind(i64::from(record.retry_count))
        .bind(i64::from(record.max_retries))
        .bind(record.provider_message_id.as_deref())
        .bind(record.error_message.as_deref())
        .bind(to_millis(record.created_at))
        .bind(to_millis(record.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: DeliveryId) -> HeraldResult<Option<DeliveryRecord>> {
        self.fetch_one_by("id", &id.to_storage()).await
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> HeraldResult<Option<DeliveryRecord>> {
        self.fetch_one_by("provider_message_id", provider_message_id).await
    }

    async fn update(
        &self,
        id: DeliveryId,
        update: &DeliveryUpdate,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<DeliveryRecord>> {
        let Some(mut record) = self.get(id).await? else {
            return Ok(None);
        };
        let (seen_status, seen_retries) = (record.status, record.retry_count);
        if !record.apply(update, now) {
            return Ok(None);
        }

        let result = sqlx::query(
            "UPDATE email_deliveries
             SET status = ?, sent_at = ?, delivered_at = ?, failed_at = ?, retry_count = ?,
                 provider_message_id = ?, error_message = ?, updated_at = ?
             WHERE id = ? AND status = ? AND retry_count = ?",
        )
        .bind(record.status.as_str())
        .bind(record.sent_at.map(to_millis))
        .bind(record.delivered_at.map(to_millis))
        .bind(record.failed_at.map(to_millis))
        .bind(i64::from(record.retry_count))
        .bind(record.provider_message_id.as_deref())
        .bind(record.error_message.as_deref())
        .bind(to_millis(record.updated_at))
        .bind(id.to_storage())
        .bind(seen_status.as_str())
        .bind(i64::from(seen_retries))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // lost the race; caller re-reads and reports the current status
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn history(
        &self,
        email_address: &str,
        limit: u32,
        offset: u32,
    ) -> HeraldResult<Vec<DeliveryRecord>> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM email_deliveries
             WHERE email_address = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(email_address)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DeliveryRecord::try_from).collect()
    }

    async fn stats(&self, since: DateTime<Utc>) -> HeraldResult<DeliveryStats> {
        let since_ms = to_millis(since);

        let grouped: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM email_deliveries
             WHERE created_at >= ?
             GROUP BY status",
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = DeliveryStatusCounts::default();
        for (status, n) in grouped {
            let status = status.parse::<DeliveryStatus>().map_err(HeraldError::Corrupt)?;
            counts.add(status, n.max(0) as u64);
        }

        let (average_retry_count,): (Option<f64>,) = sqlx::query_as(
            "SELECT AVG(retry_count) FROM email_deliveries WHERE created_at >= ?",
        )
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(DeliveryStats::new(since, counts, average_retry_count))
    }

    async fn purge_terminal(&self, older_than: DateTime<Utc>) -> HeraldResult<u64> {
        let result = sqlx::query(
            "DELETE FROM email_deliveries
             WHERE status IN ('delivered', 'bounced') AND updated_at < ?",
        )
        .bind(to_millis(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
