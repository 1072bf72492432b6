//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **Worker / WorkerGroup**: 配送ループ（claim→fetch→send→report）
//! - **RecoverySweeper**: Lease 期限切れの回収
//! - **RetentionCleaner**: 終端状態の記録の削除

pub mod builder;
pub mod gc_loop;
pub mod reaper_loop;
pub mod worker_loop;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{HeraldError, HeraldResult};

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, AppConfig, AppHandle, BuildError};
pub use self::gc_loop::{PurgeReport, RetentionCleaner};
pub use self::reaper_loop::RecoverySweeper;
pub use self::worker_loop::{Worker, WorkerConfig, WorkerGroup};

/// `fut` を `after` で打ち切る。超えたら HeraldError::Timeout
pub(crate) async fn timed<T>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = HeraldResult<T>>,
) -> HeraldResult<T> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| HeraldError::Timeout { operation, after })?
}

/// `now - age`。範囲外なら最古の時刻に丸める
pub(crate) fn older_than(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test(start_paused = true)]
    async fn timed_reports_operation_on_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, HeraldError>(())
        };

        let err = timed("claim", Duration::from_secs(1), slow).await.unwrap_err();

        assert!(matches!(err, HeraldError::Timeout { operation: "claim", .. }));
        assert!(err.is_infrastructure());
    }

    #[test]
    fn older_than_saturates() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            older_than(now, Duration::from_secs(60)),
            now - chrono::Duration::seconds(60)
        );
        assert_eq!(older_than(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
