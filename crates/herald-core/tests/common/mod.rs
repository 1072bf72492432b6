#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use herald_core::QueueManager;
use herald_core::impls::sqlite::connect;
use herald_core::impls::{InMemoryQueueStore, SqliteQueueStore};
use herald_core::ports::{FixedClock, QueueStore, UlidGenerator};

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub async fn queue_store(backend: Backend) -> Arc<dyn QueueStore> {
    match backend {
        Backend::Memory => Arc::new(InMemoryQueueStore::new()),
        Backend::Sqlite => Arc::new(SqliteQueueStore::new(
            connect("sqlite::memory:").await.unwrap(),
        )),
    }
}

pub async fn manager(backend: Backend) -> (QueueManager, FixedClock) {
    let clock = FixedClock::new(t0());
    let manager = QueueManager::new(
        queue_store(backend).await,
        Arc::new(clock.clone()),
        Arc::new(UlidGenerator::new(clock.clone())),
    );
    (manager, clock)
}
