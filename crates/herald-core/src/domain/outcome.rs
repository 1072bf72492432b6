//! Outcome of processing one claimed queue item.
//!
//! Expected conditions (failure, exhaustion, a lost lease) are represented
//! here as values, never as errors.

use serde::{Deserialize, Serialize};

use super::ids::QueueItemId;
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Sent; queue item completed.
    Completed { item_id: QueueItemId },

    /// Failed with attempts left; the item is pending again.
    RetryScheduled {
        item_id: QueueItemId,
        attempts: u32,
        cause: FailureCause,
    },

    /// Failed on the last allowed attempt; the item is terminal `failed`.
    Exhausted {
        item_id: QueueItemId,
        attempts: u32,
        cause: FailureCause,
    },

    /// Cancelled by the worker (bounce short-circuit) or by an administrator mid-send.
    Cancelled { item_id: QueueItemId, reason: String },

    /// The lease was swept and the item now belongs to someone else (or nobody).
    LeaseLost { item_id: QueueItemId },
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Transient,
    Permanent,
}

impl From<FailureCause> for ErrorKind {
    fn from(cause: FailureCause) -> Self {
        match cause {
            FailureCause::Transient => ErrorKind::Transient,
            FailureCause::Permanent => ErrorKind::Permanent,
        }
    }
}

impl DispatchOutcome {
    pub fn item_id(&self) -> QueueItemId {
        match self {
            DispatchOutcome::Completed { item_id }
            | DispatchOutcome::RetryScheduled { item_id, .. }
            | DispatchOutcome::Exhausted { item_id, .. }
            | DispatchOutcome::Cancelled { item_id, .. }
            | DispatchOutcome::LeaseLost { item_id } => *item_id,
        }
    }

    /// Error classification for diagnostics; `None` on success.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            DispatchOutcome::Completed { .. } => None,
            DispatchOutcome::RetryScheduled { cause, .. } => Some((*cause).into()),
            DispatchOutcome::Exhausted { .. } => Some(ErrorKind::Exhausted),
            DispatchOutcome::Cancelled { .. } => Some(ErrorKind::Permanent),
            DispatchOutcome::LeaseLost { .. } => Some(ErrorKind::Validation),
        }
    }
}
