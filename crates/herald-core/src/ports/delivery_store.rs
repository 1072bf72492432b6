//! DeliveryStore port - 配送台帳（DeliveryRecord）の保存先
//!
//! QueueStore とは独立しています。provider レベルの再送回数はここで数え、
//! キューレベルの attempts とは混ぜません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DeliveryId, DeliveryRecord, DeliveryStats, DeliveryUpdate};
use crate::error::HeraldResult;

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert(&self, record: &DeliveryRecord) -> HeraldResult<()>;

    async fn get(&self, id: DeliveryId) -> HeraldResult<Option<DeliveryRecord>>;

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> HeraldResult<Option<DeliveryRecord>>;

    /// Apply `update` iff the current status allows it; `Ok(None)` otherwise
    /// (including unknown ids).
    async fn update(
        &self,
        id: DeliveryId,
        update: &DeliveryUpdate,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<DeliveryRecord>>;

    /// Records for `email_address`, newest first.
    async fn history(
        &self,
        email_address: &str,
        limit: u32,
        offset: u32,
    ) -> HeraldResult<Vec<DeliveryRecord>>;

    async fn stats(&self, since: DateTime<Utc>) -> HeraldResult<DeliveryStats>;

    /// Delete `delivered` / `bounced` records last updated before `older_than`.
    async fn purge_terminal(&self, older_than: DateTime<Utc>) -> HeraldResult<u64>;
}
