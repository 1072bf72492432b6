//! SendChannel port - メール送信プロバイダの抽象化
//!
//! 送信失敗は Transient（再送してよい）と Permanent（再送しても無駄）に分類して返します。
//! 分類は実装側の責務で、呼び出し側はエラーメッセージを解析しません。

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// タイムアウト、レート制限、5xx など
    #[error("transient send failure: {0}")]
    Transient(String),

    /// 宛先不正、ハードバウンスなど
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::Transient(_) => ErrorKind::Transient,
            SendError::Permanent(_) => ErrorKind::Permanent,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SendError::Transient(msg) | SendError::Permanent(msg) => msg,
        }
    }
}

#[async_trait]
pub trait SendChannel: Send + Sync {
    /// 成功時は provider の message id を返す
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, SendError>;
}
