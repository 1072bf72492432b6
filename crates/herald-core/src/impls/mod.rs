//! Impls - 実装
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryQueueStore / InMemoryDeliveryStore**: テスト・開発用の正本
//! - **InMemoryNotificationSource**: テスト用の通知ストア
//! - **LogSendChannel**: 送信せずログに書くだけの SendChannel
//! - **sqlite**: 本番用（SqliteQueueStore, SqliteDeliveryStore）

pub mod inmem_delivery;
pub mod inmem_queue;
pub mod inmem_source;
pub mod log_channel;
pub mod sqlite;

// 主要な型を再エクスポート
pub use self::inmem_delivery::InMemoryDeliveryStore;
pub use self::inmem_queue::InMemoryQueueStore;
pub use self::inmem_source::InMemoryNotificationSource;
pub use self::log_channel::LogSendChannel;
pub use self::sqlite::{SqliteDeliveryStore, SqliteQueueStore};
