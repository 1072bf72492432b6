//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）
//!
//! Clock から timestamp を取るので、FixedClock を使えば ID の時刻部分も決定的になります。

use crate::domain::ids::{DeliveryId, NotificationId, QueueItemId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_queue_item_id(&self) -> QueueItemId;

    fn generate_delivery_id(&self) -> DeliveryId;

    fn generate_notification_id(&self) -> NotificationId;
}

/// UlidGenerator は ULID ベースの ID 生成器
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_queue_item_id(&self) -> QueueItemId {
        QueueItemId::from(self.next_ulid())
    }

    fn generate_delivery_id(&self) -> DeliveryId {
        DeliveryId::from(self.next_ulid())
    }

    fn generate_notification_id(&self) -> NotificationId {
        NotificationId::from(self.next_ulid())
    }
}
