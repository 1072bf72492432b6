//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom type
//! - 時刻でソート可能（生成順 = 辞書順）
//! - 分散生成可能（ワーカー間の調整不要）
//! - `Id<T>` の `T` は実行時に消えるマーカー型で、QueueItemId と DeliveryId を混同できない
//!
//! 永続化では prefix なしの ULID 文字列を使い、Display では prefix 付きで表示します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "qi-", "dlv-"）
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the system clock. Prefer `IdGenerator` where a clock is injected.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Storage form: the bare ULID, no prefix.
    pub fn to_storage(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Accepts both the display form (`qi-01H...`) and the bare storage form.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueItemMarker {}

impl IdMarker for QueueItemMarker {
    fn prefix() -> &'static str {
        "qi-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeliveryMarker {}

impl IdMarker for DeliveryMarker {
    fn prefix() -> &'static str {
        "dlv-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotificationMarker {}

impl IdMarker for NotificationMarker {
    fn prefix() -> &'static str {
        "ntf-"
    }
}

/// Identifier of a QueueItem (one dispatch request).
pub type QueueItemId = Id<QueueItemMarker>;

/// Identifier of a DeliveryRecord (one provider-level send ledger entry).
pub type DeliveryId = Id<DeliveryMarker>;

/// Identifier of a Notification owned by the notification service.
pub type NotificationId = Id<NotificationMarker>;

/// Stable identity of a worker; recorded as the lease owner while an item is processing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let item = QueueItemId::generate();
        let delivery = DeliveryId::generate();
        let notification = NotificationId::generate();

        assert!(item.to_string().starts_with("qi-"));
        assert!(delivery.to_string().starts_with("dlv-"));
        assert!(notification.to_string().starts_with("ntf-"));

        // let _: QueueItemId = delivery; // <- does not compile
    }

    #[test]
    fn parse_accepts_display_and_storage_forms() {
        let id = QueueItemId::generate();

        let from_display: QueueItemId = id.to_string().parse().unwrap();
        let from_storage: QueueItemId = id.to_storage().parse().unwrap();

        assert_eq!(from_display, id);
        assert_eq!(from_storage, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("qi-not-a-ulid".parse::<QueueItemId>().is_err());
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = QueueItemId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = QueueItemId::generate();

        assert!(id1 < id2);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;

        assert_eq!(size_of::<QueueItemId>(), size_of::<Ulid>());
        assert_eq!(size_of::<DeliveryId>(), 16);
    }
}
