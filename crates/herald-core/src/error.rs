use std::time::Duration;

use thiserror::Error;

use crate::domain::{DeliveryStatus, QueueStatus};

/// ErrorKind は失敗の運用分類
///
/// - Validation: 入力・遷移が不正（リトライ無意味、呼び出し側のバグ）
/// - Transient: 一時的な配送失敗（リトライ推奨）
/// - Permanent: 恒久的な配送失敗（無効アドレス、hard bounce）
/// - Exhausted: リトライ上限に到達（管理者の再投入が必要）
/// - Infrastructure: ストア・タイムアウトなど基盤の障害
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Transient,
    Permanent,
    Exhausted,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("invalid priority {0}: must be within 1..=10")]
    InvalidPriority(u8),

    #[error("invalid max_attempts {0}: must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("queue item not found: {0}")]
    NotFound(String),

    #[error("delivery record not found: {0}")]
    DeliveryNotFound(String),

    #[error("cannot {operation} queue item {id} in status {status}")]
    InvalidTransition {
        id: String,
        status: QueueStatus,
        operation: &'static str,
    },

    #[error("cannot {operation} delivery {id} in status {status}")]
    InvalidDeliveryTransition {
        id: String,
        status: DeliveryStatus,
        operation: &'static str,
    },

    #[error("lease on queue item {id} is no longer held by {worker}")]
    LeaseLost { id: String, worker: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl HeraldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeraldError::InvalidPriority(_)
            | HeraldError::InvalidMaxAttempts(_)
            | HeraldError::NotFound(_)
            | HeraldError::DeliveryNotFound(_)
            | HeraldError::InvalidTransition { .. }
            | HeraldError::InvalidDeliveryTransition { .. }
            | HeraldError::LeaseLost { .. } => ErrorKind::Validation,
            HeraldError::Timeout { .. }
            | HeraldError::Storage(_)
            | HeraldError::Serialization(_)
            | HeraldError::Corrupt(_) => ErrorKind::Infrastructure,
        }
    }

    /// Hard errors are the ones that should stop the caller (store unreachable, etc.).
    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

pub type HeraldResult<T> = Result<T, HeraldError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::priority(HeraldError::InvalidPriority(0), ErrorKind::Validation)]
    #[case::attempts(HeraldError::InvalidMaxAttempts(0), ErrorKind::Validation)]
    #[case::lease(
        HeraldError::LeaseLost { id: "qi-1".into(), worker: "w1".into() },
        ErrorKind::Validation
    )]
    #[case::timeout(
        HeraldError::Timeout { operation: "claim", after: Duration::from_secs(1) },
        ErrorKind::Infrastructure
    )]
    #[case::corrupt(HeraldError::Corrupt("bad status".into()), ErrorKind::Infrastructure)]
    fn errors_map_to_closed_kinds(#[case] err: HeraldError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn invalid_transition_message_names_status_and_operation() {
        let err = HeraldError::InvalidTransition {
            id: "qi-1".into(),
            status: QueueStatus::Failed,
            operation: "report failure for",
        };
        assert_eq!(
            err.to_string(),
            "cannot report failure for queue item qi-1 in status failed"
        );
    }
}
