//! Randomised operation sequences against both stores.
//!
//! After every step: the owner invariant holds for every item, attempts never
//! decrease, `failed` implies exhaustion, the stats partition adds up, and a
//! claim never skips a better (priority, scheduled_for) item that was due.

mod common;

use std::collections::HashMap;

use chrono::Duration;
use common::{Backend, manager};
use herald_core::QueueManager;
use herald_core::domain::{EnqueueRequest, NotificationId, QueueItemId, QueueStatus, WorkerId};
use herald_core::ports::{Clock, FixedClock};
use proptest::prelude::*;

const WORKERS: [&str; 3] = ["w0", "w1", "w2"];

#[derive(Debug, Clone)]
enum Op {
    Enqueue {
        priority: u8,
        max_attempts: u32,
        delay_secs: i64,
    },
    Claim {
        worker: usize,
        limit: u32,
    },
    Succeed {
        pick: usize,
    },
    Fail {
        pick: usize,
    },
    Cancel {
        pick: usize,
    },
    Advance {
        secs: i64,
    },
    Sweep {
        lease_secs: i64,
    },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u8..=10, 1u32..=4, 0i64..120).prop_map(|(priority, max_attempts, delay_secs)| Op::Enqueue {
            priority,
            max_attempts,
            delay_secs,
        }),
        3 => (0usize..WORKERS.len(), 1u32..5).prop_map(|(worker, limit)| Op::Claim { worker, limit }),
        2 => any::<usize>().prop_map(|pick| Op::Succeed { pick }),
        2 => any::<usize>().prop_map(|pick| Op::Fail { pick }),
        1 => any::<usize>().prop_map(|pick| Op::Cancel { pick }),
        2 => (1i64..90).prop_map(|secs| Op::Advance { secs }),
        1 => (10i64..120).prop_map(|lease_secs| Op::Sweep { lease_secs }),
    ]
}

struct Model {
    queue: QueueManager,
    clock: FixedClock,
    ids: Vec<QueueItemId>,
    attempts: HashMap<QueueItemId, u32>,
}

impl Model {
    fn pick(&self, pick: usize) -> Option<QueueItemId> {
        if self.ids.is_empty() {
            None
        } else {
            Some(self.ids[pick % self.ids.len()])
        }
    }

    /// Report as the current owner when there is one, otherwise as a bystander.
    async fn reporter(&self, id: QueueItemId) -> WorkerId {
        let item = self.queue.get(id).await.unwrap().unwrap();
        item.worker_id.unwrap_or_else(|| WorkerId::from("bystander"))
    }

    async fn apply(&mut self, op: &Op) {
        match *op {
            Op::Enqueue {
                priority,
                max_attempts,
                delay_secs,
            } => {
                let request = EnqueueRequest::new(NotificationId::generate())
                    .with_priority(priority)
                    .with_max_attempts(max_attempts)
                    .scheduled_for(self.clock.now() + Duration::seconds(delay_secs));
                let item = self.queue.enqueue(request).await.unwrap();
                self.ids.push(item.id);
            }
            Op::Claim { worker, limit } => {
                let now = self.clock.now();
                let claimed = self
                    .queue
                    .claim_batch(&WorkerId::from(WORKERS[worker]), limit, now)
                    .await
                    .unwrap();
                assert!(claimed.len() <= limit as usize);
                for pair in claimed.windows(2) {
                    assert!((pair[0].priority, pair[0].scheduled_for) <= (pair[1].priority, pair[1].scheduled_for));
                }
                if let Some(worst) = claimed.last() {
                    let worst = (worst.priority, worst.scheduled_for);
                    for item in self.queue.list(Some(QueueStatus::Pending), u32::MAX, 0).await.unwrap() {
                        if item.scheduled_for <= now {
                            assert!((item.priority, item.scheduled_for) >= worst, "claim skipped a better item");
                        }
                    }
                }
                for item in &claimed {
                    assert!(item.scheduled_for <= now);
                    assert_eq!(item.worker_id.as_ref().map(WorkerId::as_str), Some(WORKERS[worker]));
                }
            }
            Op::Succeed { pick } => {
                if let Some(id) = self.pick(pick) {
                    let worker = self.reporter(id).await;
                    if let Err(e) = self.queue.report_success(id, &worker).await {
                        assert!(!e.is_infrastructure(), "{e}");
                    }
                }
            }
            Op::Fail { pick } => {
                if let Some(id) = self.pick(pick) {
                    let worker = self.reporter(id).await;
                    if let Err(e) = self.queue.report_failure(id, &worker, "boom").await {
                        assert!(!e.is_infrastructure(), "{e}");
                    }
                }
            }
            Op::Cancel { pick } => {
                if let Some(id) = self.pick(pick) {
                    if let Err(e) = self.queue.cancel(id).await {
                        assert!(!e.is_infrastructure(), "{e}");
                    }
                }
            }
            Op::Advance { secs } => self.clock.advance(Duration::seconds(secs)),
            Op::Sweep { lease_secs } => {
                self.queue
                    .sweep_stuck(self.clock.now() - Duration::seconds(lease_secs))
                    .await
                    .unwrap();
            }
        }
    }

    async fn check(&mut self) {
        let items = self.queue.list(None, u32::MAX, 0).await.unwrap();
        assert_eq!(items.len(), self.ids.len());

        for item in &items {
            assert!(item.lease_invariant_holds(), "owner invariant broken: {item:?}");
            if item.status == QueueStatus::Failed {
                assert!(item.attempts >= item.max_attempts);
            }
            let previous = self.attempts.insert(item.id, item.attempts).unwrap_or(0);
            assert!(item.attempts >= previous, "attempts decreased for {}", item.id);
        }

        let stats = self.queue.stats(Duration::days(365)).await.unwrap();
        let c = stats.counts;
        assert_eq!(stats.total, c.pending + c.processing + c.completed + c.failed + c.cancelled);
        assert_eq!(stats.total, items.len() as u64);
    }
}

fn run(backend: Backend, ops: Vec<Op>) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let (queue, clock) = manager(backend).await;
        let mut model = Model {
            queue,
            clock,
            ids: Vec::new(),
            attempts: HashMap::new(),
        };
        for op in &ops {
            model.apply(op).await;
            model.check().await;
        }
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn in_memory_store_keeps_invariants(ops in prop::collection::vec(op(), 1..60)) {
        run(Backend::Memory, ops);
    }

    #[test]
    fn sqlite_store_keeps_invariants(ops in prop::collection::vec(op(), 1..60)) {
        run(Backend::Sqlite, ops);
    }
}
