//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 起動時検証（Fail-fast 設計）
//! - 必須コンポーネント（QueueStore, DeliveryStore, NotificationSource, SendChannel）が揃っているか
//! - lease_timeout が 1 item の最悪処理時間 `WorkerConfig::worst_case_item()` より長いか
//!   （Worker は item ごとに lease を更新するので、バッチ全体ではなく 1 item 分で足りる）
//! - workers / batch_size が 0 でないか

use std::sync::Arc;
use std::time::Duration;

use super::gc_loop::RetentionCleaner;
use super::reaper_loop::RecoverySweeper;
use super::worker_loop::{Worker, WorkerConfig, WorkerGroup};
use crate::domain::WorkerId;
use crate::ports::{
    Clock, DeliveryStore, IdGenerator, NotificationSource, QueueStore, SendChannel, SystemClock,
    UlidGenerator,
};
use crate::queue::{QueueManager, RetryPolicy};
use crate::tracker::DeliveryTracker;

/// 実行時パラメータ
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workers: usize,
    /// WorkerId は `{worker_prefix}-{n}`。インスタンス間で重複しないこと（既定値は ULID）
    pub worker_prefix: String,
    pub worker: WorkerConfig,
    pub retry: RetryPolicy,
    pub lease_timeout: Duration,
    pub sweep_interval: Duration,
    pub queue_retention: Duration,
    pub delivery_retention: Duration,
    pub gc_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            worker_prefix: format!("herald-{}", ulid::Ulid::new().to_string().to_lowercase()),
            worker: WorkerConfig::default(),
            retry: RetryPolicy::default(),
            lease_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            queue_retention: Duration::from_secs(30 * 86_400),
            delivery_retention: Duration::from_secs(90 * 86_400),
            gc_interval: Duration::from_secs(3600),
        }
    }
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}")]
    MissingComponent(&'static str),

    #[error(
        "lease_timeout {lease_timeout:?} must exceed the worst-case time one item holds its lease \
         {worst_case:?} (send_timeout x (provider_max_retries + 1) plus step timeouts)"
    )]
    LeaseTooShort {
        lease_timeout: Duration,
        worst_case: Duration,
    },

    #[error("at least one worker is required")]
    NoWorkers,

    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
}

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .queue_store(Arc::new(SqliteQueueStore::new(pool.clone())))
///     .delivery_store(Arc::new(SqliteDeliveryStore::new(pool)))
///     .notification_source(source)
///     .send_channel(Arc::new(LogSendChannel))
///     .config(config)
///     .build()?;
/// let handle = app.start();
/// ```
#[derive(Default)]
pub struct AppBuilder {
    queue_store: Option<Arc<dyn QueueStore>>,
    delivery_store: Option<Arc<dyn DeliveryStore>>,
    source: Option<Arc<dyn NotificationSource>>,
    channel: Option<Arc<dyn SendChannel>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: AppConfig,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.queue_store = Some(store);
        self
    }

    pub fn delivery_store(mut self, store: Arc<dyn DeliveryStore>) -> Self {
        self.delivery_store = Some(store);
        self
    }

    pub fn notification_source(mut self, source: Arc<dyn NotificationSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn send_channel(mut self, channel: Arc<dyn SendChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// 省略時は SystemClock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 省略時は clock を使う UlidGenerator
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let queue_store = self
            .queue_store
            .ok_or(BuildError::MissingComponent("queue store"))?;
        let delivery_store = self
            .delivery_store
            .ok_or(BuildError::MissingComponent("delivery store"))?;
        let source = self
            .source
            .ok_or(BuildError::MissingComponent("notification source"))?;
        let channel = self
            .channel
            .ok_or(BuildError::MissingComponent("send channel"))?;

        let config = self.config;
        if config.workers == 0 {
            return Err(BuildError::NoWorkers);
        }
        if config.worker.batch_size == 0 {
            return Err(BuildError::ZeroBatchSize);
        }
        let worst_case = config.worker.worst_case_item();
        if config.lease_timeout <= worst_case {
            return Err(BuildError::LeaseTooShort {
                lease_timeout: config.lease_timeout,
                worst_case,
            });
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));

        let queue = QueueManager::new(queue_store, clock.clone(), ids.clone())
            .with_retry_policy(config.retry.clone());
        let tracker = DeliveryTracker::new(delivery_store, clock, ids);

        Ok(App {
            queue,
            tracker,
            source,
            channel,
            config,
        })
    }
}

/// App は配線済みのコンポーネント一式
pub struct App {
    queue: QueueManager,
    tracker: DeliveryTracker,
    source: Arc<dyn NotificationSource>,
    channel: Arc<dyn SendChannel>,
    config: AppConfig,
}

impl App {
    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workers(&self) -> Vec<Worker> {
        (0..self.config.workers)
            .map(|n| {
                Worker::new(
                    WorkerId::new(format!("{}-{n}", self.config.worker_prefix)),
                    self.queue.clone(),
                    self.tracker.clone(),
                    self.source.clone(),
                    self.channel.clone(),
                    self.config.worker.clone(),
                )
            })
            .collect()
    }

    pub fn sweeper(&self) -> RecoverySweeper {
        RecoverySweeper::new(
            self.queue.clone(),
            self.config.lease_timeout,
            self.config.sweep_interval,
        )
    }

    pub fn cleaner(&self) -> RetentionCleaner {
        RetentionCleaner::new(
            self.queue.clone(),
            self.tracker.clone(),
            self.config.queue_retention,
            self.config.delivery_retention,
            self.config.gc_interval,
        )
    }

    /// Spawn workers, the recovery sweeper and the retention cleaner.
    pub fn start(self) -> AppHandle {
        let mut group = WorkerGroup::spawn(self.workers());
        group.attach(tokio::spawn(self.sweeper().run(group.subscribe())));
        group.attach(tokio::spawn(self.cleaner().run(group.subscribe())));
        tracing::info!(workers = self.config.workers, "herald started");
        AppHandle {
            queue: self.queue,
            tracker: self.tracker,
            group,
        }
    }
}

pub struct AppHandle {
    queue: QueueManager,
    tracker: DeliveryTracker,
    group: WorkerGroup,
}

impl AppHandle {
    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn request_shutdown(&self) {
        self.group.request_shutdown();
    }

    /// Stop claiming, let in-flight items finish, then wait for every task.
    pub async fn shutdown_and_join(self) {
        self.group.shutdown_and_join().await;
        tracing::info!("herald stopped");
    }
}
