//! Delivery record: provider-level ledger entry for one send to one address.
//!
//! Retry counting here is independent of `QueueItem::attempts`: this counts
//! provider retries inside a single queue attempt.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DeliveryId, NotificationId};

/// Delivery status.
///
/// - Pending -> Sent | Failed | Bounced
/// - Failed -> Sent | Failed | Bounced (provider retry)
/// - Sent -> Delivered | Bounced | Failed
/// - Delivered, Bounced: terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Bounced,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Sent,
        DeliveryStatus::Delivered,
        DeliveryStatus::Failed,
        DeliveryStatus::Bounced,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Bounced)
    }

    /// Source statuses from which `self` may be entered.
    pub fn allowed_sources(self) -> &'static [DeliveryStatus] {
        match self {
            DeliveryStatus::Pending => &[],
            DeliveryStatus::Sent => &[DeliveryStatus::Pending, DeliveryStatus::Failed],
            DeliveryStatus::Delivered => &[DeliveryStatus::Sent],
            DeliveryStatus::Failed => &[
                DeliveryStatus::Pending,
                DeliveryStatus::Failed,
                DeliveryStatus::Sent,
            ],
            DeliveryStatus::Bounced => &[
                DeliveryStatus::Pending,
                DeliveryStatus::Failed,
                DeliveryStatus::Sent,
            ],
        }
    }

    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        next.allowed_sources().contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Bounced => "bounced",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown delivery status: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub notification_id: NotificationId,
    pub email_address: String,
    pub status: DeliveryStatus,

    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Correlation id returned by the send channel.
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn new_pending(
        id: DeliveryId,
        notification_id: NotificationId,
        email_address: impl Into<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            notification_id,
            email_address: email_address.into(),
            status: DeliveryStatus::Pending,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            retry_count: 0,
            max_retries,
            provider_message_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// May the provider send be attempted again?
    pub fn can_retry(&self) -> bool {
        !self.status.is_terminal() && self.retry_count <= self.max_retries
    }

    /// Apply a transition in place. Returns `false` (and leaves the record
    /// untouched) when the transition is not allowed from the current status.
    pub fn apply(&mut self, update: &DeliveryUpdate, now: DateTime<Utc>) -> bool {
        let next = update.target_status();
        if !self.status.can_transition_to(next) {
            return false;
        }
        match update {
            DeliveryUpdate::Sent { provider_message_id } => {
                self.sent_at = Some(now);
                self.provider_message_id = Some(provider_message_id.clone());
            }
            DeliveryUpdate::Delivered => {
                self.delivered_at = Some(now);
            }
            DeliveryUpdate::Failed { error } => {
                self.failed_at = Some(now);
                self.retry_count += 1;
                self.error_message = Some(error.clone());
            }
            DeliveryUpdate::Bounced { reason } => {
                self.failed_at = Some(now);
                self.error_message = Some(reason.clone());
            }
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}

/// A single status change of a delivery record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryUpdate {
    Sent { provider_message_id: String },
    Delivered,
    Failed { error: String },
    Bounced { reason: String },
}

impl DeliveryUpdate {
    pub fn target_status(&self) -> DeliveryStatus {
        match self {
            DeliveryUpdate::Sent { .. } => DeliveryStatus::Sent,
            DeliveryUpdate::Delivered => DeliveryStatus::Delivered,
            DeliveryUpdate::Failed { .. } => DeliveryStatus::Failed,
            DeliveryUpdate::Bounced { .. } => DeliveryStatus::Bounced,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            DeliveryUpdate::Sent { .. } => "mark sent",
            DeliveryUpdate::Delivered => "mark delivered",
            DeliveryUpdate::Failed { .. } => "mark failed",
            DeliveryUpdate::Bounced { .. } => "mark bounced",
        }
    }
}

/// Asynchronous provider callback (webhook, feedback loop) keyed by provider message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProviderEvent {
    Delivered,
    Bounced { reason: String },
    Failed { reason: String },
}

impl From<ProviderEvent> for DeliveryUpdate {
    fn from(event: ProviderEvent) -> Self {
        match event {
            ProviderEvent::Delivered => DeliveryUpdate::Delivered,
            ProviderEvent::Bounced { reason } => DeliveryUpdate::Bounced { reason },
            ProviderEvent::Failed { reason } => DeliveryUpdate::Failed { error: reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(max_retries: u32) -> DeliveryRecord {
        DeliveryRecord::new_pending(
            DeliveryId::generate(),
            NotificationId::generate(),
            "reader@library.test",
            max_retries,
            Utc::now(),
        )
    }

    #[rstest]
    #[case(DeliveryStatus::Pending, DeliveryStatus::Sent, true)]
    #[case(DeliveryStatus::Failed, DeliveryStatus::Sent, true)]
    #[case(DeliveryStatus::Sent, DeliveryStatus::Delivered, true)]
    #[case(DeliveryStatus::Sent, DeliveryStatus::Bounced, true)]
    #[case(DeliveryStatus::Pending, DeliveryStatus::Delivered, false)]
    #[case(DeliveryStatus::Delivered, DeliveryStatus::Failed, false)]
    #[case(DeliveryStatus::Bounced, DeliveryStatus::Sent, false)]
    fn transitions(
        #[case] from: DeliveryStatus,
        #[case] to: DeliveryStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn failed_increments_retry_count_and_keeps_error() {
        let mut r = record(2);
        let now = Utc::now();

        assert!(r.apply(&DeliveryUpdate::Failed { error: "timeout".into() }, now));
        assert!(r.apply(&DeliveryUpdate::Failed { error: "421".into() }, now));

        assert_eq!(r.status, DeliveryStatus::Failed);
        assert_eq!(r.retry_count, 2);
        assert_eq!(r.error_message.as_deref(), Some("421"));
        assert_eq!(r.failed_at, Some(now));
        assert!(r.can_retry());

        r.apply(&DeliveryUpdate::Failed { error: "again".into() }, now);
        assert!(!r.can_retry());
    }

    #[test]
    fn retry_after_failure_can_still_be_sent() {
        let mut r = record(3);
        let now = Utc::now();
        r.apply(&DeliveryUpdate::Failed { error: "timeout".into() }, now);

        assert!(r.apply(
            &DeliveryUpdate::Sent { provider_message_id: "msg-1".into() },
            now
        ));
        assert_eq!(r.status, DeliveryStatus::Sent);
        assert_eq!(r.provider_message_id.as_deref(), Some("msg-1"));
        assert_eq!(r.retry_count, 1);
    }

    #[test]
    fn terminal_record_rejects_updates() {
        let mut r = record(3);
        let now = Utc::now();
        r.apply(&DeliveryUpdate::Bounced { reason: "no such user".into() }, now);

        let before = r.clone();
        assert!(!r.apply(&DeliveryUpdate::Delivered, now));
        assert_eq!(r, before);
        assert!(!r.can_retry());
    }

    #[test]
    fn provider_event_serializes_with_tag() {
        let event = ProviderEvent::Bounced { reason: "mailbox full".into() };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "bounced");
        assert_eq!(v["reason"], "mailbox full");
    }
}
