//! Domain model (IDs, queue items, delivery records, notifications, stats, outcomes).

pub mod delivery;
pub mod ids;
pub mod notification;
pub mod outcome;
pub mod queue_item;
pub mod stats;

pub use delivery::{DeliveryRecord, DeliveryStatus, DeliveryUpdate, ProviderEvent};
pub use ids::{DeliveryId, NotificationId, QueueItemId, WorkerId};
pub use notification::{Notification, NotificationKind};
pub use outcome::{DispatchOutcome, FailureCause};
pub use queue_item::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY, EnqueueRequest, MAX_PRIORITY, MIN_PRIORITY,
    Metadata, QueueItem, QueueStatus,
};
pub use stats::{DeliveryStats, DeliveryStatusCounts, QueueStats, QueueStatusCounts};
