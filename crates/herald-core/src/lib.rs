//! herald-core
//!
//! Core building blocks for the Herald notification dispatch pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, queue_item, delivery, notification, stats, outcome）
//! - **ports**: 抽象化レイヤー（QueueStore, DeliveryStore, NotificationSource, SendChannel, Clock, IdGenerator）
//! - **queue**: QueueManager と RetryPolicy
//! - **tracker**: DeliveryTracker（provider レベルの配送台帳）
//! - **app**: アプリケーション層（builder, worker_loop, reaper_loop, gc_loop）
//! - **impls**: 実装（in-memory, SQLite, LogSendChannel）
//! - **error**: エラー型と ErrorKind

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod tracker;

pub use error::{ErrorKind, HeraldError, HeraldResult};
pub use queue::{QueueManager, RequeueOptions, RetryPolicy};
pub use tracker::DeliveryTracker;
