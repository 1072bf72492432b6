//! End-to-end dispatch over the SQLite stores.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::t0;
use herald_core::app::{AppBuilder, AppConfig, WorkerConfig};
use herald_core::domain::{
    DeliveryStatus, DispatchOutcome, EnqueueRequest, FailureCause, Notification, NotificationKind,
    ProviderEvent, QueueStatus,
};
use herald_core::impls::sqlite::connect;
use herald_core::impls::{InMemoryNotificationSource, SqliteDeliveryStore, SqliteQueueStore};
use herald_core::ports::{FixedClock, SendChannel, SendError};

/// Fails with a transient error for the first `failures` calls.
struct FlakyChannel {
    failures: Mutex<u32>,
}

#[async_trait]
impl SendChannel for FlakyChannel {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<String, SendError> {
        let mut left = self.failures.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Err(SendError::Transient("451 greylisted".into()));
        }
        Ok("prov-001".into())
    }
}

#[tokio::test]
async fn greylisted_send_is_retried_by_queue_and_delivered() {
    let pool = connect("sqlite::memory:").await.unwrap();
    let source = InMemoryNotificationSource::new();
    let notification = Notification::new(
        NotificationKind::FineNotice,
        "patron@example.org",
        "Outstanding fine",
        "You owe 2.50.",
    );
    source.insert(notification.clone());

    let app = AppBuilder::new()
        .queue_store(Arc::new(SqliteQueueStore::new(pool.clone())))
        .delivery_store(Arc::new(SqliteDeliveryStore::new(pool)))
        .notification_source(Arc::new(source))
        // one provider retry per queue attempt: two sends per attempt
        .send_channel(Arc::new(FlakyChannel { failures: Mutex::new(2) }))
        .clock(Arc::new(FixedClock::new(t0())))
        .config(AppConfig {
            workers: 1,
            worker: WorkerConfig {
                provider_max_retries: 1,
                ..Default::default()
            },
            ..Default::default()
        })
        .build()
        .unwrap();

    let item = app
        .queue()
        .enqueue(EnqueueRequest::new(notification.id).with_max_attempts(3))
        .await
        .unwrap();
    let worker = app.workers().remove(0);

    let first = worker.run_once().await.unwrap();
    assert_eq!(
        first,
        vec![DispatchOutcome::RetryScheduled {
            item_id: item.id,
            attempts: 1,
            cause: FailureCause::Transient,
        }]
    );

    let second = worker.run_once().await.unwrap();
    assert_eq!(second, vec![DispatchOutcome::Completed { item_id: item.id }]);

    let stored = app.queue().get(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Completed);
    assert_eq!(stored.attempts, 1);

    let history = app.tracker().history("patron@example.org", 10, 0).await.unwrap();
    assert_eq!(history.len(), 2);
    let statuses: Vec<DeliveryStatus> = history.iter().map(|r| r.status).collect();
    assert!(statuses.contains(&DeliveryStatus::Failed));
    assert!(statuses.contains(&DeliveryStatus::Sent));

    let delivered = app
        .tracker()
        .apply_provider_event("prov-001", ProviderEvent::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.status, DeliveryStatus::Delivered);

    let stats = app.tracker().stats(chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.counts.delivered, 1);
    assert_eq!(stats.counts.failed, 1);
}
