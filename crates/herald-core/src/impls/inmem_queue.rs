//! InMemoryQueueStore - テスト・開発用のキュー正本
//!
//! # 実装詳細
//! - HashMap<QueueItemId, QueueItem> を tokio の Mutex 1 つで保護
//! - claim は「選択 → processing への遷移」を同じロック区間で行う
//! - ロックを保持したまま await しない

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    QueueItem, QueueItemId, QueueStats, QueueStatus, QueueStatusCounts, WorkerId,
};
use crate::error::HeraldResult;
use crate::ports::QueueStore;
use crate::queue::RetryPolicy;

#[derive(Clone, Default)]
pub struct InMemoryQueueStore {
    items: Arc<Mutex<HashMap<QueueItemId, QueueItem>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

type ClaimKey = (u8, DateTime<Utc>, DateTime<Utc>, QueueItemId);

fn claim_order(item: &QueueItem) -> ClaimKey {
    (item.priority, item.scheduled_for, item.created_at, item.id)
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, item: &QueueItem) -> HeraldResult<()> {
        self.items.lock().await.insert(item.id, item.clone());
        Ok(())
    }

    async fn get(&self, id: QueueItemId) -> HeraldResult<Option<QueueItem>> {
        Ok(self.items.lock().await.get(&id).cloned())
    }

    async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: u32,
        offset: u32,
    ) -> HeraldResult<Vec<QueueItem>> {
        let items = self.items.lock().await;
        let mut matching: Vec<QueueItem> = items
            .values()
            .filter(|item| status.is_none_or(|s| item.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn claim(
        &self,
        worker: &WorkerId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> HeraldResult<Vec<QueueItem>> {
        let mut items = self.items.lock().await;

        let mut due: Vec<&QueueItem> = items
            .values()
            .filter(|item| item.is_claimable_at(now))
            .collect();
        due.sort_by_key(|item| claim_order(item));
        let ids: Vec<QueueItemId> = due
            .into_iter()
            .take(limit as usize)
            .map(|item| item.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = items.get_mut(&id) {
                item.status = QueueStatus::Processing;
                item.processing_started_at = Some(now);
                item.processing_completed_at = None;
                item.worker_id = Some(worker.clone());
                item.updated_at = now;
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<QueueItem>> {
        let mut items = self.items.lock().await;
        let Some(item) = items.get_mut(&id).filter(|item| item.is_owned_by(worker)) else {
            return Ok(None);
        };
        item.status = QueueStatus::Completed;
        item.processing_completed_at = Some(now);
        item.worker_id = None;
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn renew_lease(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<QueueItem>> {
        let mut items = self.items.lock().await;
        let Some(item) = items.get_mut(&id).filter(|item| item.is_owned_by(worker)) else {
            return Ok(None);
        };
        item.processing_started_at = Some(now);
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn fail(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        error: &str,
        now: DateTime<Utc>,
        retry: &RetryPolicy,
    ) -> HeraldResult<Option<QueueItem>> {
        let mut items = self.items.lock().await;
        let Some(item) = items.get_mut(&id).filter(|item| item.is_owned_by(worker)) else {
            return Ok(None);
        };
        item.attempts += 1;
        item.status = if item.retries_exhausted() {
            QueueStatus::Failed
        } else {
            QueueStatus::Pending
        };
        item.error_message = Some(error.to_string());
        item.processing_completed_at = Some(now);
        item.worker_id = None;
        item.updated_at = now;
        if item.status == QueueStatus::Pending {
            if let Some(at) = retry.next_run_at(item.attempts, now) {
                item.scheduled_for = at;
            }
        }
        Ok(Some(item.clone()))
    }

    async fn cancel(&self, id: QueueItemId, now: DateTime<Utc>) -> HeraldResult<Option<QueueItem>> {
        let mut items = self.items.lock().await;
        let Some(item) = items.get_mut(&id).filter(|item| item.status.is_cancellable()) else {
            return Ok(None);
        };
        item.status = QueueStatus::Cancelled;
        item.worker_id = None;
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn sweep(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> HeraldResult<u64> {
        let mut items = self.items.lock().await;
        let mut recovered = 0;
        for item in items.values_mut() {
            let stuck = item.status == QueueStatus::Processing
                && item.processing_started_at.is_some_and(|started| started < older_than);
            if stuck {
                item.status = QueueStatus::Pending;
                item.worker_id = None;
                item.processing_started_at = None;
                item.updated_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn stats(&self, since: DateTime<Utc>) -> HeraldResult<QueueStats> {
        let items = self.items.lock().await;
        let in_window: Vec<&QueueItem> = items
            .values()
            .filter(|item| item.created_at >= since)
            .collect();

        let mut counts = QueueStatusCounts::default();
        for item in &in_window {
            counts.add(item.status, 1);
        }

        let processing_times: Vec<f64> = in_window
            .iter()
            .filter(|item| item.status == QueueStatus::Completed)
            .filter_map(|item| item.processing_time_seconds())
            .collect();
        let attempts: Vec<f64> = in_window.iter().map(|item| item.attempts as f64).collect();

        Ok(QueueStats::new(
            since,
            counts,
            mean(&processing_times),
            mean(&attempts),
        ))
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> HeraldResult<u64> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|_, item| !(item.status.is_terminal() && item.created_at < older_than));
        Ok((before - items.len()) as u64)
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
