//! InMemoryNotificationSource - テスト・開発用の通知ストア

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::{Notification, NotificationId};
use crate::error::HeraldResult;
use crate::ports::NotificationSource;

#[derive(Clone, Default)]
pub struct InMemoryNotificationSource {
    notifications: Arc<RwLock<HashMap<NotificationId, Notification>>>,
}

impl InMemoryNotificationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, notification: Notification) {
        self.notifications
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(notification.id, notification);
    }

    pub fn remove(&self, id: NotificationId) -> Option<Notification> {
        self.notifications
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }
}

#[async_trait]
impl NotificationSource for InMemoryNotificationSource {
    async fn fetch(&self, id: NotificationId) -> HeraldResult<Option<Notification>> {
        Ok(self
            .notifications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }
}
