//! InMemoryDeliveryStore - 開発用の配送台帳
//!
//! # 実装詳細
//! - HashMap<DeliveryId, DeliveryRecord> を std の Mutex で保護
//! - ロック区間に await を含まないので tokio の Mutex は不要
//! - 遷移判定は DeliveryRecord::apply に任せる（SQLite 実装と同じ規則）

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::inmem_queue::mean;
use crate::domain::{
    DeliveryId, DeliveryRecord, DeliveryStats, DeliveryStatusCounts, DeliveryUpdate,
};
use crate::error::HeraldResult;
use crate::ports::DeliveryStore;

#[derive(Clone, Default)]
pub struct InMemoryDeliveryStore {
    records: Arc<Mutex<HashMap<DeliveryId, DeliveryRecord>>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeliveryId, DeliveryRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn insert(&self, record: &DeliveryRecord) -> HeraldResult<()> {
        self.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: DeliveryId) -> HeraldResult<Option<DeliveryRecord>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> HeraldResult<Option<DeliveryRecord>> {
        Ok(self
            .lock()
            .values()
            .find(|r| r.provider_message_id.as_deref() == Some(provider_message_id))
            .cloned())
    }

    async fn update(
        &self,
        id: DeliveryId,
        update: &DeliveryUpdate,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<DeliveryRecord>> {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.apply(update, now) {
            Ok(Some(record.clone()))
        } else {
            Ok(None)
        }
    }

    async fn history(
        &self,
        email_address: &str,
        limit: u32,
        offset: u32,
    ) -> HeraldResult<Vec<DeliveryRecord>> {
        let mut matching: Vec<DeliveryRecord> = self
            .lock()
            .values()
            .filter(|r| r.email_address == email_address)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn stats(&self, since: DateTime<Utc>) -> HeraldResult<DeliveryStats> {
        let records = self.lock();
        let mut counts = DeliveryStatusCounts::default();
        let mut retries = Vec::new();
        for record in records.values().filter(|r| r.created_at >= since) {
            counts.add(record.status, 1);
            retries.push(record.retry_count as f64);
        }
        Ok(DeliveryStats::new(since, counts, mean(&retries)))
    }

    async fn purge_terminal(&self, older_than: DateTime<Utc>) -> HeraldResult<u64> {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, r| !(r.status.is_terminal() && r.updated_at < older_than));
        Ok((before - records.len()) as u64)
    }
}
