//! SQLite-backed NotificationSource.
//!
//! The library pipeline only reads notifications; the CLI owns this table so
//! `herald notify` can create one and enqueue it in the same database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_core::HeraldResult;
use herald_core::domain::{Notification, NotificationId, NotificationKind};
use herald_core::error::HeraldError;
use herald_core::ports::NotificationSource;
use sqlx::{FromRow, SqlitePool};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS notifications (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    recipient   TEXT NOT NULL,
    subject     TEXT NOT NULL,
    body        TEXT NOT NULL,
    created_at  INTEGER NOT NULL
)";

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: String,
    kind: String,
    recipient: String,
    subject: String,
    body: String,
    created_at: i64,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = HeraldError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, raw: &str| HeraldError::Corrupt(format!("bad {what} {raw:?}"));
        Ok(Notification {
            id: row.id.parse().map_err(|_| corrupt("notification id", &row.id))?,
            kind: row.kind.parse().map_err(|_| corrupt("notification kind", &row.kind))?,
            recipient: row.recipient,
            subject: row.subject,
            body: row.body,
            created_at: DateTime::<Utc>::from_timestamp_millis(row.created_at)
                .ok_or_else(|| corrupt("created_at", &row.created_at.to_string()))?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteNotificationSource {
    pool: SqlitePool,
}

impl SqliteNotificationSource {
    pub async fn open(pool: SqlitePool) -> HeraldResult<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn insert(&self, notification: &Notification) -> HeraldResult<()> {
        sqlx::query(
            "INSERT INTO notifications (id, kind, recipient, subject, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(notification.id.to_storage())
        .bind(notification.kind.as_str())
        .bind(&notification.recipient)
        .bind(&notification.subject)
        .bind(&notification.body)
        .bind(notification.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create(
        &self,
        kind: NotificationKind,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> HeraldResult<Notification> {
        let notification = Notification::new(kind, recipient, subject, body);
        self.insert(&notification).await?;
        Ok(notification)
    }
}

#[async_trait]
impl NotificationSource for SqliteNotificationSource {
    async fn fetch(&self, id: NotificationId) -> HeraldResult<Option<Notification>> {
        let row: Option<NotificationRow> = sqlx::query_as(
            "SELECT id, kind, recipient, subject, body, created_at FROM notifications WHERE id = ?",
        )
        .bind(id.to_storage())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Notification::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::impls::sqlite::connect;

    #[tokio::test]
    async fn created_notification_can_be_fetched() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let source = SqliteNotificationSource::open(pool).await.unwrap();

        let created = source
            .create(NotificationKind::DueSoon, "reader@example.org", "Due tomorrow", "Return it.")
            .await
            .unwrap();
        let fetched = source.fetch(created.id).await.unwrap().unwrap();

        assert_eq!(fetched.kind, NotificationKind::DueSoon);
        assert_eq!(fetched.recipient, "reader@example.org");
        assert_eq!(
            fetched.created_at.timestamp_millis(),
            created.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let source = SqliteNotificationSource::open(pool).await.unwrap();

        assert!(source.fetch(NotificationId::generate()).await.unwrap().is_none());
    }
}
