//! NotificationSource port - 通知内容の取得元
//!
//! キューは notification_id しか持たないので、Worker は送信前にここから本文を引きます。

use async_trait::async_trait;

use crate::domain::{Notification, NotificationId};
use crate::error::HeraldResult;

#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// 見つからなければ `Ok(None)`
    async fn fetch(&self, id: NotificationId) -> HeraldResult<Option<Notification>>;
}
