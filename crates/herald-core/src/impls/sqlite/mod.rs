//! SQLite-backed stores.
//!
//! Timestamps are stored as Unix milliseconds (INTEGER) so that range
//! predicates and ordering are plain integer comparisons. Metadata is JSON TEXT.
//!
//! [`connect`] creates the schema idempotently. File databases run in WAL mode
//! with a busy timeout so several processes can share one queue; in-memory
//! databases are pinned to a single long-lived connection, since every new
//! connection would otherwise see an empty database.

mod delivery_store;
mod queue_store;

pub use delivery_store::SqliteDeliveryStore;
pub use queue_store::SqliteQueueStore;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use crate::domain::ids::{Id, IdMarker};
use crate::error::{HeraldError, HeraldResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 8;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS notification_queue (
        id                       TEXT PRIMARY KEY,
        notification_id          TEXT NOT NULL,
        priority                 INTEGER NOT NULL CHECK (priority BETWEEN 1 AND 10),
        scheduled_for            INTEGER NOT NULL,
        attempts                 INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
        max_attempts             INTEGER NOT NULL CHECK (max_attempts >= 1),
        status                   TEXT NOT NULL
                                 CHECK (status IN ('pending', 'processing', 'completed', 'failed', 'cancelled')),
        error_message            TEXT,
        processing_started_at    INTEGER,
        processing_completed_at  INTEGER,
        worker_id                TEXT,
        metadata                 TEXT NOT NULL DEFAULT '{}',
        created_at               INTEGER NOT NULL,
        updated_at               INTEGER NOT NULL,
        CHECK ((worker_id IS NOT NULL) = (status = 'processing'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_notification_queue_claim
        ON notification_queue (status, priority, scheduled_for)",
    "CREATE INDEX IF NOT EXISTS idx_notification_queue_created_at
        ON notification_queue (created_at)",
    "CREATE TABLE IF NOT EXISTS email_deliveries (
        id                   TEXT PRIMARY KEY,
        notification_id      TEXT NOT NULL,
        email_address        TEXT NOT NULL,
        status               TEXT NOT NULL
                             CHECK (status IN ('pending', 'sent', 'delivered', 'failed', 'bounced')),
        sent_at              INTEGER,
        delivered_at         INTEGER,
        failed_at            INTEGER,
        retry_count          INTEGER NOT NULL DEFAULT 0,
        max_retries          INTEGER NOT NULL DEFAULT 0,
        provider_message_id  TEXT,
        error_message        TEXT,
        created_at           INTEGER NOT NULL,
        updated_at           INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_email_deliveries_email
        ON email_deliveries (email_address, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_email_deliveries_provider_message_id
        ON email_deliveries (provider_message_id)",
];

/// Open a pool for `database_url` and make sure the schema exists.
pub async fn connect(database_url: &str) -> HeraldResult<SqlitePool> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    let pool = pool_options.connect_with(options).await?;
    migrate(&pool).await?;
    info!(database_url, in_memory, "database ready");
    Ok(pool)
}

/// Create tables and indexes if they do not exist yet.
pub async fn migrate(pool: &SqlitePool) -> HeraldResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> HeraldResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| HeraldError::Corrupt(format!("timestamp out of range: {ms}")))
}

pub(crate) fn from_millis_opt(ms: Option<i64>) -> HeraldResult<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

pub(crate) fn parse_id<T: IdMarker>(raw: &str) -> HeraldResult<Id<T>> {
    raw.parse()
        .map_err(|e| HeraldError::Corrupt(format!("bad id {raw:?}: {e}")))
}

pub(crate) fn to_u32(value: i64, column: &str) -> HeraldResult<u32> {
    u32::try_from(value).map_err(|_| HeraldError::Corrupt(format!("{column} out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = connect("sqlite::memory:").await.unwrap();

        migrate(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"notification_queue"));
        assert!(names.contains(&"email_deliveries"));
    }

    #[tokio::test]
    async fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("herald.db").display());
        let pool = connect(&url).await.unwrap();

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn millis_roundtrip_keeps_millisecond_precision() {
        let at = DateTime::from_timestamp_millis(1_709_283_600_123).unwrap();
        assert_eq!(from_millis(to_millis(at)).unwrap(), at);
        assert!(from_millis(i64::MAX).is_err());
    }
}
