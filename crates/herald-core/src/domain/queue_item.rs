//! Queue item: dispatch metadata for one notification send request.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{NotificationId, QueueItemId, WorkerId};

/// Opaque key/value payload carried alongside a queue item.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Queue item status.
///
/// State transitions:
/// - Pending -> Processing (claim)
/// - Processing -> Completed (success)
/// - Processing -> Pending (failure with attempts < max, or lease sweep)
/// - Processing -> Failed (failure with attempts >= max)
/// - Pending | Processing -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Completed,
        QueueStatus::Failed,
        QueueStatus::Cancelled,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown queue status: {s}"))
    }
}

/// Persisted dispatch metadata for one notification.
///
/// This is the single source of truth for queue state; all transitions happen
/// through the store so that a claim is never observed half-applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub notification_id: NotificationId,

    /// 1 (highest) ..= 10 (lowest).
    pub priority: u8,

    /// Not claimable before this instant.
    pub scheduled_for: DateTime<Utc>,

    /// Number of failed attempts reported so far.
    pub attempts: u32,

    /// Fixed at enqueue time.
    pub max_attempts: u32,

    pub status: QueueStatus,

    /// Set on the most recent failure.
    pub error_message: Option<String>,

    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,

    /// Lease owner; present iff `status == Processing`.
    pub worker_id: Option<WorkerId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new_pending(
        id: QueueItemId,
        request: EnqueueRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            notification_id: request.notification_id,
            priority: request.priority,
            scheduled_for: request.scheduled_for.unwrap_or(now),
            attempts: 0,
            max_attempts: request.max_attempts,
            status: QueueStatus::Pending,
            error_message: None,
            processing_started_at: None,
            processing_completed_at: None,
            worker_id: None,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// `worker_id.is_some() == (status == Processing)`.
    pub fn lease_invariant_holds(&self) -> bool {
        self.worker_id.is_some() == (self.status == QueueStatus::Processing)
    }

    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_for <= now
    }

    pub fn is_owned_by(&self, worker: &WorkerId) -> bool {
        self.status == QueueStatus::Processing && self.worker_id.as_ref() == Some(worker)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn processing_time_seconds(&self) -> Option<f64> {
        match (self.processing_started_at, self.processing_completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }
}

/// Input for `QueueManager::enqueue`.
///
/// Priority and max_attempts are validated by the manager, not here, so that an
/// invalid request can be represented and rejected with a typed error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub notification_id: NotificationId,
    pub priority: u8,

    /// `None` means "as soon as possible" (the enqueue instant).
    pub scheduled_for: Option<DateTime<Utc>>,

    pub max_attempts: u32,

    #[serde(default)]
    pub metadata: Metadata,
}

impl EnqueueRequest {
    pub fn new(notification_id: NotificationId) -> Self {
        Self {
            notification_id,
            priority: DEFAULT_PRIORITY,
            scheduled_for: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            metadata: Metadata::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
