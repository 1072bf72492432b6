//! RecoverySweeper - lease 期限切れの回収
//!
//! # フロー
//! 1. 一定間隔で cutoff = now - lease_timeout を計算
//! 2. QueueManager::sweep_stuck(cutoff) で processing のまま残った item を pending に戻す
//!
//! attempts は増やしません。lease を失った Worker の報告は LeaseLost で弾かれます。

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use super::{older_than, timed};
use crate::error::HeraldResult;
use crate::queue::QueueManager;

pub struct RecoverySweeper {
    queue: QueueManager,
    lease_timeout: Duration,
    interval: Duration,
    step_timeout: Duration,
}

impl RecoverySweeper {
    pub fn new(queue: QueueManager, lease_timeout: Duration, interval: Duration) -> Self {
        Self {
            queue,
            lease_timeout,
            interval,
            step_timeout: Duration::from_secs(30),
        }
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// One sweep. Returns the number of items put back to `pending`.
    pub async fn sweep_once(&self) -> HeraldResult<u64> {
        let cutoff = older_than(self.queue.now(), self.lease_timeout);
        timed("sweep", self.step_timeout, self.queue.sweep_stuck(cutoff)).await
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(lease_timeout = ?self.lease_timeout, interval = ?self.interval, "recovery sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("recovery sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use crate::domain::{EnqueueRequest, NotificationId, QueueStatus, WorkerId};
    use crate::impls::InMemoryQueueStore;
    use crate::ports::{Clock, FixedClock, UlidGenerator};

    fn setup() -> (QueueManager, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let queue = QueueManager::new(
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(clock.clone()),
            Arc::new(UlidGenerator::new(clock.clone())),
        );
        (queue, clock)
    }

    #[tokio::test]
    async fn sweep_recovers_only_expired_leases() {
        let (queue, clock) = setup();
        let item = queue
            .enqueue(EnqueueRequest::new(NotificationId::generate()))
            .await
            .unwrap();
        queue
            .claim_batch(&WorkerId::from("crashed"), 1, clock.now())
            .await
            .unwrap();
        let sweeper = RecoverySweeper::new(queue.clone(), Duration::from_secs(300), Duration::from_secs(60));

        clock.advance(chrono::Duration::seconds(299));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        let recovered = queue.get(item.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, QueueStatus::Pending);
        assert_eq!(recovered.attempts, 0);
        assert!(recovered.lease_invariant_holds());
        assert_eq!(
            queue
                .claim_batch(&WorkerId::from("survivor"), 1, clock.now())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let (queue, _) = setup();
        let sweeper = RecoverySweeper::new(queue, Duration::from_secs(300), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);

        let join = tokio::spawn(sweeper.run(rx));
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send_replace(true);

        join.await.unwrap();
    }
}
