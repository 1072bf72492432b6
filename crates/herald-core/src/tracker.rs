//! DeliveryTracker: provider-level ledger of every send attempt.
//!
//! One record per (notification, address) dispatch. Its `retry_count` counts
//! provider retries and is independent of the queue item's `attempts`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    DeliveryId, DeliveryRecord, DeliveryStats, DeliveryUpdate, NotificationId, ProviderEvent,
};
use crate::error::{HeraldError, HeraldResult};
use crate::ports::{Clock, DeliveryStore, IdGenerator};

#[derive(Clone)]
pub struct DeliveryTracker {
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl DeliveryTracker {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { store, clock, ids }
    }

    pub async fn begin(
        &self,
        notification_id: NotificationId,
        email_address: &str,
        max_retries: u32,
    ) -> HeraldResult<DeliveryRecord> {
        let record = DeliveryRecord::new_pending(
            self.ids.generate_delivery_id(),
            notification_id,
            email_address,
            max_retries,
            self.clock.now(),
        );
        self.store.insert(&record).await?;
        debug!(delivery_id = %record.id, notification_id = %notification_id, "delivery started");
        Ok(record)
    }

    pub async fn mark_sent(
        &self,
        id: DeliveryId,
        provider_message_id: &str,
    ) -> HeraldResult<DeliveryRecord> {
        self.apply(
            id,
            DeliveryUpdate::Sent {
                provider_message_id: provider_message_id.to_string(),
            },
        )
        .await
    }

    pub async fn mark_delivered(&self, id: DeliveryId) -> HeraldResult<DeliveryRecord> {
        self.apply(id, DeliveryUpdate::Delivered).await
    }

    /// Record a failed send; increments `retry_count`.
    pub async fn mark_failed(&self, id: DeliveryId, error_message: &str) -> HeraldResult<DeliveryRecord> {
        self.apply(
            id,
            DeliveryUpdate::Failed {
                error: error_message.to_string(),
            },
        )
        .await
    }

    pub async fn mark_bounced(&self, id: DeliveryId, reason: &str) -> HeraldResult<DeliveryRecord> {
        self.apply(
            id,
            DeliveryUpdate::Bounced {
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Apply an asynchronous provider callback, addressed by provider message id.
    pub async fn apply_provider_event(
        &self,
        provider_message_id: &str,
        event: ProviderEvent,
    ) -> HeraldResult<DeliveryRecord> {
        let record = self
            .store
            .find_by_provider_message_id(provider_message_id)
            .await?
            .ok_or_else(|| HeraldError::DeliveryNotFound(provider_message_id.to_string()))?;
        self.apply(record.id, event.into()).await
    }

    pub async fn get(&self, id: DeliveryId) -> HeraldResult<Option<DeliveryRecord>> {
        self.store.get(id).await
    }

    pub async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> HeraldResult<Option<DeliveryRecord>> {
        self.store.find_by_provider_message_id(provider_message_id).await
    }

    pub async fn stats(&self, window: Duration) -> HeraldResult<DeliveryStats> {
        let since = self.clock.now() - window;
        self.store.stats(since).await
    }

    /// Newest first.
    pub async fn history(
        &self,
        email_address: &str,
        limit: u32,
        offset: u32,
    ) -> HeraldResult<Vec<DeliveryRecord>> {
        self.store.history(email_address, limit, offset).await
    }

    pub async fn purge_terminal(&self, older_than: DateTime<Utc>) -> HeraldResult<u64> {
        let purged = self.store.purge_terminal(older_than).await?;
        if purged > 0 {
            info!(purged, older_than = %older_than, "purged terminal deliveries");
        }
        Ok(purged)
    }

    async fn apply(&self, id: DeliveryId, update: DeliveryUpdate) -> HeraldResult<DeliveryRecord> {
        let now = self.clock.now();
        if let Some(record) = self.store.update(id, &update, now).await? {
            debug!(delivery_id = %id, status = %record.status, retry_count = record.retry_count, "delivery updated");
            return Ok(record);
        }

        match self.store.get(id).await? {
            None => Err(HeraldError::DeliveryNotFound(id.to_string())),
            Some(current) => {
                warn!(delivery_id = %id, status = %current.status, operation = update.operation(), "rejected delivery transition");
                Err(HeraldError::InvalidDeliveryTransition {
                    id: id.to_string(),
                    status: current.status,
                    operation: update.operation(),
                })
            }
        }
    }
}
