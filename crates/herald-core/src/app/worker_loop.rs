//! Worker - 配送ループ
//!
//! # フロー
//! 1. QueueManager::claim_batch() で最大 batch_size 件を取得
//! 2. item ごとに QueueManager::renew_lease()。失っていれば送らずに次へ
//! 3. NotificationSource::fetch() で本文を取得（無ければキューレベルの失敗）
//! 4. DeliveryTracker::begin() で配送記録を作成
//! 5. SendChannel::send()。Transient なら mark_failed し、lease を更新して
//!    retry_count <= max_retries の間は再送
//! 6. 成功なら mark_sent + report_success、諦めたら report_failure
//!
//! どのステップも timeout 付きで実行します。インフラ障害はログに出して次の item へ進みます。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::timed;
use crate::domain::{DispatchOutcome, FailureCause, QueueItem, QueueStatus, WorkerId};
use crate::error::{HeraldError, HeraldResult};
use crate::ports::{NotificationSource, SendChannel, SendError};
use crate::queue::QueueManager;
use crate::tracker::DeliveryTracker;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: u32,
    /// 空振りしたときの待ち時間
    pub poll_interval: Duration,
    /// 1 回の send の上限
    pub send_timeout: Duration,
    /// claim / fetch / report など send 以外の 1 ステップの上限
    pub step_timeout: Duration,
    pub provider_max_retries: u32,
    /// Permanent エラーで item を cancel する（false なら report_failure）
    pub cancel_on_bounce: bool,
}

impl WorkerConfig {
    /// Longest one item can hold its lease between renewals: every send and
    /// every step timing out.
    pub fn worst_case_item(&self) -> Duration {
        let sends = self.provider_max_retries.saturating_add(1);
        // fetch, begin, renew, report + (mark, renew) per send
        let steps = sends.saturating_mul(2).saturating_add(4);
        self.send_timeout
            .saturating_mul(sends)
            .saturating_add(self.step_timeout.saturating_mul(steps))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            send_timeout: Duration::from_secs(30),
            step_timeout: Duration::from_secs(10),
            provider_max_retries: 2,
            cancel_on_bounce: false,
        }
    }
}

pub struct Worker {
    id: WorkerId,
    queue: QueueManager,
    tracker: DeliveryTracker,
    source: Arc<dyn NotificationSource>,
    channel: Arc<dyn SendChannel>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        queue: QueueManager,
        tracker: DeliveryTracker,
        source: Arc<dyn NotificationSource>,
        channel: Arc<dyn SendChannel>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id,
            queue,
            tracker,
            source,
            channel,
            config,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Claim one batch and process every item in it.
    ///
    /// Only a failed claim is returned as an error; per-item infrastructure
    /// errors are logged and the item is left to the recovery sweeper.
    pub async fn run_once(&self) -> HeraldResult<Vec<DispatchOutcome>> {
        let now = self.queue.now();
        let batch = timed(
            "claim",
            self.config.step_timeout,
            self.queue.claim_batch(&self.id, self.config.batch_size, now),
        )
        .await?;

        let mut outcomes = Vec::with_capacity(batch.len());
        for item in &batch {
            match self.process(item).await {
                Ok(outcome) => {
                    debug!(worker_id = %self.id, item_id = %item.id, ?outcome, "processed");
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!(worker_id = %self.id, item_id = %item.id, error = %e, "processing aborted");
                }
            }
        }
        Ok(outcomes)
    }

    /// Poll until `shutdown` flips to true. An item already in flight is finished first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(outcomes) => outcomes.is_empty(),
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "claim failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        info!(worker_id = %self.id, "worker stopped");
    }

    async fn process(&self, item: &QueueItem) -> HeraldResult<DispatchOutcome> {
        let step = self.config.step_timeout;

        // later items of a batch have been waiting since the claim
        if let Some(outcome) = self.renew(item).await? {
            return Ok(outcome);
        }

        let notification = timed("fetch notification", step, self.source.fetch(item.notification_id)).await?;
        let Some(notification) = notification else {
            let message = format!("notification {} not found", item.notification_id);
            return self.fail(item, FailureCause::Permanent, &message).await;
        };

        let mut record = timed(
            "begin delivery",
            step,
            self.tracker.begin(
                notification.id,
                &notification.recipient,
                self.config.provider_max_retries,
            ),
        )
        .await?;

        loop {
            match self.send(&notification.recipient, &notification.subject, &notification.body).await {
                Ok(provider_message_id) => {
                    timed("mark sent", step, self.tracker.mark_sent(record.id, &provider_message_id)).await?;
                    return match timed("report success", step, self.queue.report_success(item.id, &self.id)).await {
                        Ok(_) => Ok(DispatchOutcome::Completed { item_id: item.id }),
                        Err(e) => self.released(item, e),
                    };
                }
                Err(SendError::Transient(message)) => {
                    record = timed("mark failed", step, self.tracker.mark_failed(record.id, &message)).await?;
                    if record.can_retry() {
                        debug!(
                            item_id = %item.id,
                            delivery_id = %record.id,
                            retry_count = record.retry_count,
                            error = %message,
                            "transient send failure, retrying"
                        );
                        if let Some(outcome) = self.renew(item).await? {
                            return Ok(outcome);
                        }
                        continue;
                    }
                    return self.fail(item, FailureCause::Transient, &message).await;
                }
                Err(SendError::Permanent(reason)) => {
                    timed("mark bounced", step, self.tracker.mark_bounced(record.id, &reason)).await?;
                    if self.config.cancel_on_bounce {
                        return match timed("cancel", step, self.queue.cancel(item.id)).await {
                            Ok(_) => Ok(DispatchOutcome::Cancelled { item_id: item.id, reason }),
                            Err(e) => self.released(item, e),
                        };
                    }
                    return self.fail(item, FailureCause::Permanent, &reason).await;
                }
            }
        }
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, SendError> {
        let after = self.config.send_timeout;
        match tokio::time::timeout(after, self.channel.send(to, subject, body)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Transient(format!("send timed out after {after:?}"))),
        }
    }

    async fn fail(
        &self,
        item: &QueueItem,
        cause: FailureCause,
        message: &str,
    ) -> HeraldResult<DispatchOutcome> {
        let reported = timed(
            "report failure",
            self.config.step_timeout,
            self.queue.report_failure(item.id, &self.id, message),
        )
        .await;

        match reported {
            Ok(updated) if updated.status == QueueStatus::Failed => Ok(DispatchOutcome::Exhausted {
                item_id: item.id,
                attempts: updated.attempts,
                cause,
            }),
            Ok(updated) => Ok(DispatchOutcome::RetryScheduled {
                item_id: item.id,
                attempts: updated.attempts,
                cause,
            }),
            Err(e) => self.released(item, e),
        }
    }

    /// `Some` when the item is no longer ours to send.
    async fn renew(&self, item: &QueueItem) -> HeraldResult<Option<DispatchOutcome>> {
        match timed(
            "renew lease",
            self.config.step_timeout,
            self.queue.renew_lease(item.id, &self.id),
        )
        .await
        {
            Ok(_) => Ok(None),
            Err(e) => self.released(item, e).map(Some),
        }
    }

    /// Outcome for an update the queue rejected because the item moved on without us.
    fn released(&self, item: &QueueItem, error: HeraldError) -> HeraldResult<DispatchOutcome> {
        match error {
            HeraldError::InvalidTransition {
                status: QueueStatus::Cancelled,
                ..
            } => {
                info!(worker_id = %self.id, item_id = %item.id, "cancelled while processing");
                Ok(DispatchOutcome::Cancelled {
                    item_id: item.id,
                    reason: "cancelled while processing".to_string(),
                })
            }
            // swept, then re-claimed or finished elsewhere
            HeraldError::LeaseLost { .. } | HeraldError::InvalidTransition { .. } => {
                Ok(self.lease_lost(item))
            }
            e => Err(e),
        }
    }

    fn lease_lost(&self, item: &QueueItem) -> DispatchOutcome {
        warn!(worker_id = %self.id, item_id = %item.id, "lease lost, result discarded");
        DispatchOutcome::LeaseLost { item_id: item.id }
    }
}

/// Worker group handle.
/// - `request_shutdown()` で全ワーカーが新しい claim をやめる
/// - `shutdown_and_join()` で処理中の item を終えるまで待つ
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn(workers: Vec<Worker>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut group = Self {
            shutdown_tx,
            joins: Vec::with_capacity(workers.len()),
        };
        for worker in workers {
            let rx = group.subscribe();
            group.joins.push(tokio::spawn(worker.run(rx)));
        }
        group
    }

    /// Receiver that flips to true on shutdown; background loops share it.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn attach(&mut self, join: JoinHandle<()>) {
        self.joins.push(join);
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "task panicked during shutdown");
            }
        }
    }
}
