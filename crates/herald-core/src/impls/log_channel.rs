//! LogSendChannel - 実際には送信せず tracing に書き出すだけの SendChannel
//!
//! 開発環境と CLI のデフォルト。provider message id は ULID で採番します。

use async_trait::async_trait;
use tracing::info;
use ulid::Ulid;

use crate::ports::{SendChannel, SendError};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSendChannel;

impl LogSendChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SendChannel for LogSendChannel {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, SendError> {
        if !to.contains('@') {
            return Err(SendError::Permanent(format!("invalid recipient address: {to}")));
        }
        let message_id = format!("log-{}", Ulid::new());
        info!(to, subject, body_len = body.len(), message_id = %message_id, "email sent (log channel)");
        Ok(message_id)
    }
}
