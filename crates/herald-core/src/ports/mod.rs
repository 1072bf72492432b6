//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（SQLite, メール送信プロバイダ, 通知サービス）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - QueueStore が source of truth（正本）。Worker 間の協調はここだけで行う
//! - DeliveryStore は provider レベルの配送台帳
//! - 時刻と ID は Clock / IdGenerator 経由（テストで決定的にするため）

pub mod clock;
pub mod delivery_store;
pub mod id_generator;
pub mod notification_source;
pub mod queue_store;
pub mod send_channel;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_store::DeliveryStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notification_source::NotificationSource;
pub use self::queue_store::QueueStore;
pub use self::send_channel::{SendChannel, SendError};
