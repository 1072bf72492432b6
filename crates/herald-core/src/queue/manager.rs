//! QueueManager: validated entry point for every queue transition.
//!
//! The store does the atomic work; the manager validates input, stamps times
//! from the injected clock, and turns a rejected conditional update into a
//! precise error (`NotFound`, `LeaseLost`, `InvalidTransition`).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::RetryPolicy;
use crate::domain::{
    EnqueueRequest, MAX_PRIORITY, MIN_PRIORITY, QueueItem, QueueItemId, QueueStats, QueueStatus,
    WorkerId,
};
use crate::error::{HeraldError, HeraldResult};
use crate::ports::{Clock, IdGenerator, QueueStore};

/// Overrides applied when an administrator re-enqueues a terminal item.
#[derive(Debug, Clone, Default)]
pub struct RequeueOptions {
    pub priority: Option<u8>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_attempts: Option<u32>,
}

#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry: RetryPolicy,
}

impl QueueManager {
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            store,
            clock,
            ids,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn enqueue(&self, request: EnqueueRequest) -> HeraldResult<QueueItem> {
        validate(request.priority, request.max_attempts)?;

        let now = self.clock.now();
        let item = QueueItem::new_pending(self.ids.generate_queue_item_id(), request, now);
        self.store.insert(&item).await?;

        debug!(
            item_id = %item.id,
            notification_id = %item.notification_id,
            priority = item.priority,
            scheduled_for = %item.scheduled_for,
            "enqueued"
        );
        Ok(item)
    }

    /// Claim up to `limit` items that are due at `now`.
    pub async fn claim_batch(
        &self,
        worker: &WorkerId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> HeraldResult<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let items = self.store.claim(worker, limit, now).await?;
        if !items.is_empty() {
            debug!(worker_id = %worker, claimed = items.len(), "claimed batch");
        }
        Ok(items)
    }

    pub async fn report_success(&self, id: QueueItemId, worker: &WorkerId) -> HeraldResult<QueueItem> {
        let now = self.clock.now();
        match self.store.complete(id, worker, now).await? {
            Some(item) => {
                debug!(item_id = %id, worker_id = %worker, "completed");
                Ok(item)
            }
            None => Err(self.rejection(id, Some(worker), "complete").await),
        }
    }

    /// Extend the lease on an item `worker` is about to work on.
    pub async fn renew_lease(&self, id: QueueItemId, worker: &WorkerId) -> HeraldResult<QueueItem> {
        let now = self.clock.now();
        match self.store.renew_lease(id, worker, now).await? {
            Some(item) => Ok(item),
            None => Err(self.rejection(id, Some(worker), "renew lease on").await),
        }
    }

    /// Record a failed attempt. The item returns to `pending` or becomes
    /// `failed` once `attempts` reaches `max_attempts`.
    pub async fn report_failure(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        error_message: &str,
    ) -> HeraldResult<QueueItem> {
        let now = self.clock.now();
        match self
            .store
            .fail(id, worker, error_message, now, &self.retry)
            .await?
        {
            Some(item) => {
                if item.status == QueueStatus::Failed {
                    warn!(
                        item_id = %id,
                        attempts = item.attempts,
                        error = error_message,
                        "retries exhausted"
                    );
                } else {
                    info!(
                        item_id = %id,
                        attempts = item.attempts,
                        max_attempts = item.max_attempts,
                        scheduled_for = %item.scheduled_for,
                        error = error_message,
                        "attempt failed, will retry"
                    );
                }
                Ok(item)
            }
            None => Err(self.rejection(id, Some(worker), "report failure for").await),
        }
    }

    pub async fn cancel(&self, id: QueueItemId) -> HeraldResult<QueueItem> {
        let now = self.clock.now();
        match self.store.cancel(id, now).await? {
            Some(item) => {
                info!(item_id = %id, "cancelled");
                Ok(item)
            }
            None => Err(self.rejection(id, None, "cancel").await),
        }
    }

    /// Return `processing` items whose lease started before `older_than` to `pending`.
    pub async fn sweep_stuck(&self, older_than: DateTime<Utc>) -> HeraldResult<u64> {
        let now = self.clock.now();
        let recovered = self.store.sweep(older_than, now).await?;
        if recovered > 0 {
            warn!(recovered, older_than = %older_than, "recovered stuck items");
        }
        Ok(recovered)
    }

    /// Stats over items created within `window` of now.
    pub async fn stats(&self, window: Duration) -> HeraldResult<QueueStats> {
        let since = self.clock.now() - window;
        self.store.stats(since).await
    }

    pub async fn purge_old(&self, older_than: DateTime<Utc>) -> HeraldResult<u64> {
        let purged = self.store.purge(older_than).await?;
        if purged > 0 {
            info!(purged, older_than = %older_than, "purged terminal queue items");
        }
        Ok(purged)
    }

    pub async fn get(&self, id: QueueItemId) -> HeraldResult<Option<QueueItem>> {
        self.store.get(id).await
    }

    pub async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: u32,
        offset: u32,
    ) -> HeraldResult<Vec<QueueItem>> {
        self.store.list(status, limit, offset).await
    }

    /// Create a fresh pending item for the notification behind a `failed` or
    /// `cancelled` item. The original item is left as it is.
    pub async fn requeue(&self, id: QueueItemId, options: RequeueOptions) -> HeraldResult<QueueItem> {
        let original = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| HeraldError::NotFound(id.to_string()))?;

        if !matches!(original.status, QueueStatus::Failed | QueueStatus::Cancelled) {
            return Err(HeraldError::InvalidTransition {
                id: id.to_string(),
                status: original.status,
                operation: "requeue",
            });
        }

        let mut request = EnqueueRequest::new(original.notification_id)
            .with_priority(options.priority.unwrap_or(original.priority))
            .with_max_attempts(options.max_attempts.unwrap_or(original.max_attempts));
        request.scheduled_for = options.scheduled_for;
        request.metadata = original.metadata.clone();

        let item = self.enqueue(request).await?;
        info!(item_id = %item.id, requeued_from = %id, "requeued");
        Ok(item)
    }

    /// Explain why a conditional update matched nothing.
    async fn rejection(
        &self,
        id: QueueItemId,
        worker: Option<&WorkerId>,
        operation: &'static str,
    ) -> HeraldError {
        let current = match self.store.get(id).await {
            Ok(Some(item)) => item,
            Ok(None) => return HeraldError::NotFound(id.to_string()),
            Err(e) => return e,
        };

        if let Some(worker) = worker {
            if current.status == QueueStatus::Processing && !current.is_owned_by(worker) {
                return HeraldError::LeaseLost {
                    id: id.to_string(),
                    worker: worker.to_string(),
                };
            }
        }

        HeraldError::InvalidTransition {
            id: id.to_string(),
            status: current.status,
            operation,
        }
    }
}

fn validate(priority: u8, max_attempts: u32) -> HeraldResult<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(HeraldError::InvalidPriority(priority));
    }
    if max_attempts < 1 {
        return Err(HeraldError::InvalidMaxAttempts(max_attempts));
    }
    Ok(())
}
