//! Notification record as supplied by the notification service.
//!
//! The pipeline only reads these; it never decides what a notification says.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::NotificationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OverdueReminder,
    DueSoon,
    BookAvailable,
    FineNotice,
    General,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::OverdueReminder => "overdue_reminder",
            NotificationKind::DueSoon => "due_soon",
            NotificationKind::BookAvailable => "book_available",
            NotificationKind::FineNotice => "fine_notice",
            NotificationKind::General => "general",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overdue_reminder" => Ok(NotificationKind::OverdueReminder),
            "due_soon" => Ok(NotificationKind::DueSoon),
            "book_available" => Ok(NotificationKind::BookAvailable),
            "fine_notice" => Ok(NotificationKind::FineNotice),
            "general" => Ok(NotificationKind::General),
            other => Err(format!("unknown notification kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,

    /// Target email address.
    pub recipient: String,

    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            kind,
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}
