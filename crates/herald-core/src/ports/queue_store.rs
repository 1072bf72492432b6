//! QueueStore port - キューの正本（source of truth）
//!
//! QueueStore は QueueItem の状態遷移を原子的に行います。
//!
//! # 設計原則
//! - claim は唯一のクリティカルセクション：選択と processing への遷移を 1 操作で行う
//!   （select してから update する 2 段階は禁止）
//! - 遷移系メソッドは条件付き更新。前提状態でなければ `Ok(None)` を返し、何も変更しない
//! - 失敗・枯渇は状態として表現し、Err はインフラ障害のみ
//! - renew_lease は所有者が一致するときだけ lease 開始時刻を打ち直す
//!   （バッチ内の後続 item が処理待ちの間に Sweeper に回収されないように）
//!
//! # 実装
//! - InMemoryQueueStore（テスト・開発用）
//! - SqliteQueueStore（本番用、UPDATE ... RETURNING）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{QueueItem, QueueItemId, QueueStats, QueueStatus, WorkerId};
use crate::error::HeraldResult;
use crate::queue::RetryPolicy;

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn insert(&self, item: &QueueItem) -> HeraldResult<()>;

    async fn get(&self, id: QueueItemId) -> HeraldResult<Option<QueueItem>>;

    /// Items ordered by `created_at DESC`, optionally filtered by status.
    async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: u32,
        offset: u32,
    ) -> HeraldResult<Vec<QueueItem>>;

    /// Atomically take up to `limit` claimable items for `worker`.
    ///
    /// Returned in `priority ASC, scheduled_for ASC` order.
    async fn claim(
        &self,
        worker: &WorkerId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> HeraldResult<Vec<QueueItem>>;

    /// `processing` (owned by `worker`) -> `completed`.
    async fn complete(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<QueueItem>>;

    /// Re-stamp `processing_started_at` on an item `worker` still owns.
    async fn renew_lease(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> HeraldResult<Option<QueueItem>>;

    /// `processing` (owned by `worker`) -> `pending` | `failed`, with `attempts += 1`
    /// in the same atomic step.
    async fn fail(
        &self,
        id: QueueItemId,
        worker: &WorkerId,
        error: &str,
        now: DateTime<Utc>,
        retry: &RetryPolicy,
    ) -> HeraldResult<Option<QueueItem>>;

    /// `pending` | `processing` -> `cancelled`.
    async fn cancel(&self, id: QueueItemId, now: DateTime<Utc>) -> HeraldResult<Option<QueueItem>>;

    /// Reset `processing` items whose `processing_started_at < older_than` to `pending`.
    async fn sweep(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> HeraldResult<u64>;

    async fn stats(&self, since: DateTime<Utc>) -> HeraldResult<QueueStats>;

    /// Delete terminal items created before `older_than`.
    async fn purge(&self, older_than: DateTime<Utc>) -> HeraldResult<u64>;
}
