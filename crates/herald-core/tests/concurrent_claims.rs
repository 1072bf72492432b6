//! Many workers claiming from one queue at once must never share an item.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::t0;
use herald_core::domain::{EnqueueRequest, NotificationId, QueueItemId, WorkerId};
use herald_core::impls::sqlite::connect;
use herald_core::impls::{InMemoryQueueStore, SqliteQueueStore};
use herald_core::ports::{Clock, FixedClock, QueueStore, UlidGenerator};
use herald_core::QueueManager;

const ITEMS: usize = 200;
const WORKERS: usize = 8;

fn manager_over(store: Arc<dyn QueueStore>, clock: &FixedClock) -> QueueManager {
    QueueManager::new(
        store,
        Arc::new(clock.clone()),
        Arc::new(UlidGenerator::new(clock.clone())),
    )
}

/// Every worker gets its own manager (and, for SQLite, its own pool).
async fn drain(managers: Vec<QueueManager>, clock: FixedClock) -> Vec<Vec<QueueItemId>> {
    let mut joins = Vec::new();
    for (n, queue) in managers.into_iter().enumerate() {
        let clock = clock.clone();
        joins.push(tokio::spawn(async move {
            let worker = WorkerId::new(format!("w{n}"));
            let mut mine = Vec::new();
            loop {
                let batch = queue.claim_batch(&worker, 3, clock.now()).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                for item in batch {
                    assert_eq!(item.worker_id.as_ref(), Some(&worker));
                    queue.report_success(item.id, &worker).await.unwrap();
                    mine.push(item.id);
                }
                tokio::task::yield_now().await;
            }
            mine
        }));
    }

    let mut claimed = Vec::new();
    for join in joins {
        claimed.push(join.await.unwrap());
    }
    claimed
}

fn assert_disjoint_and_complete(claimed: &[Vec<QueueItemId>], enqueued: &HashSet<QueueItemId>) {
    let mut seen = HashSet::new();
    for ids in claimed {
        for id in ids {
            assert!(seen.insert(*id), "item {id} claimed twice");
        }
    }
    assert_eq!(&seen, enqueued);
}

async fn fill(queue: &QueueManager) -> HashSet<QueueItemId> {
    let mut ids = HashSet::new();
    for n in 0..ITEMS {
        let request = EnqueueRequest::new(NotificationId::generate()).with_priority((n % 10) as u8 + 1);
        ids.insert(queue.enqueue(request).await.unwrap().id);
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_memory_claims_are_disjoint() {
    let clock = FixedClock::new(t0());
    let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
    let managers: Vec<_> = (0..WORKERS).map(|_| manager_over(store.clone(), &clock)).collect();
    let enqueued = fill(&managers[0]).await;

    let claimed = drain(managers, clock).await;

    assert_disjoint_and_complete(&claimed, &enqueued);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_claims_across_connections_are_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());
    let clock = FixedClock::new(t0());

    let mut managers = Vec::new();
    for _ in 0..WORKERS {
        // separate pools stand in for separate processes
        let pool = connect(&url).await.unwrap();
        managers.push(manager_over(Arc::new(SqliteQueueStore::new(pool)), &clock));
    }
    let enqueued = fill(&managers[0]).await;

    let claimed = drain(managers, clock).await;

    assert_disjoint_and_complete(&claimed, &enqueued);
}
