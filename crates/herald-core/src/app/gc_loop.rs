//! RetentionCleaner - 終端状態の記録のガベージコレクション
//!
//! # フロー
//! 1. 定期的に QueueManager::purge_old(now - queue_retention)
//! 2. DeliveryTracker::purge_terminal(now - delivery_retention)
//!
//! pending / processing の item と、終端でない配送記録は消しません。

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use super::{older_than, timed};
use crate::error::HeraldResult;
use crate::queue::QueueManager;
use crate::tracker::DeliveryTracker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub queue_items: u64,
    pub deliveries: u64,
}

pub struct RetentionCleaner {
    queue: QueueManager,
    tracker: DeliveryTracker,
    queue_retention: Duration,
    delivery_retention: Duration,
    interval: Duration,
    step_timeout: Duration,
}

impl RetentionCleaner {
    pub fn new(
        queue: QueueManager,
        tracker: DeliveryTracker,
        queue_retention: Duration,
        delivery_retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            tracker,
            queue_retention,
            delivery_retention,
            interval,
            step_timeout: Duration::from_secs(60),
        }
    }

    pub async fn run_once(&self) -> HeraldResult<PurgeReport> {
        let now = self.queue.now();
        let queue_items = timed(
            "purge queue",
            self.step_timeout,
            self.queue.purge_old(older_than(now, self.queue_retention)),
        )
        .await?;
        let deliveries = timed(
            "purge deliveries",
            self.step_timeout,
            self.tracker.purge_terminal(older_than(now, self.delivery_retention)),
        )
        .await?;
        Ok(PurgeReport {
            queue_items,
            deliveries,
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "retention cleaner started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "retention cleanup failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("retention cleaner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use crate::domain::{EnqueueRequest, NotificationId};
    use crate::impls::{InMemoryDeliveryStore, InMemoryQueueStore};
    use crate::ports::{FixedClock, UlidGenerator};

    #[tokio::test]
    async fn purges_expired_terminal_records_only() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let queue = QueueManager::new(Arc::new(InMemoryQueueStore::new()), Arc::new(clock.clone()), ids.clone());
        let tracker = DeliveryTracker::new(Arc::new(InMemoryDeliveryStore::new()), Arc::new(clock.clone()), ids);

        let cancelled = queue.enqueue(EnqueueRequest::new(NotificationId::generate())).await.unwrap();
        queue.cancel(cancelled.id).await.unwrap();
        let waiting = queue.enqueue(EnqueueRequest::new(NotificationId::generate())).await.unwrap();
        let bounced = tracker.begin(NotificationId::generate(), "a@example.org", 0).await.unwrap();
        tracker.mark_bounced(bounced.id, "550").await.unwrap();

        let cleaner = RetentionCleaner::new(
            queue.clone(),
            tracker.clone(),
            Duration::from_secs(30 * 86_400),
            Duration::from_secs(90 * 86_400),
            Duration::from_secs(3600),
        );

        clock.advance(chrono::Duration::days(31));
        let report = cleaner.run_once().await.unwrap();
        assert_eq!(report, PurgeReport { queue_items: 1, deliveries: 0 });
        assert!(queue.get(waiting.id).await.unwrap().is_some());

        clock.advance(chrono::Duration::days(60));
        let report = cleaner.run_once().await.unwrap();
        assert_eq!(report, PurgeReport { queue_items: 0, deliveries: 1 });
    }
}
