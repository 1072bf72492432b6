//! Aggregate counters for the administrative surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::delivery::DeliveryStatus;
use super::queue_item::QueueStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl QueueStatusCounts {
    pub fn add(&mut self, status: QueueStatus, n: u64) {
        match status {
            QueueStatus::Pending => self.pending += n,
            QueueStatus::Processing => self.processing += n,
            QueueStatus::Completed => self.completed += n,
            QueueStatus::Failed => self.failed += n,
            QueueStatus::Cancelled => self.cancelled += n,
        }
    }

    pub fn get(&self, status: QueueStatus) -> u64 {
        match status {
            QueueStatus::Pending => self.pending,
            QueueStatus::Processing => self.processing,
            QueueStatus::Completed => self.completed,
            QueueStatus::Failed => self.failed,
            QueueStatus::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

/// Queue statistics over items created since `since`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub since: DateTime<Utc>,
    pub counts: QueueStatusCounts,
    pub total: u64,

    /// Mean of `processing_completed_at - processing_started_at` over items that have both.
    pub average_processing_time_seconds: Option<f64>,

    /// Mean `attempts` over all items in the window.
    pub average_attempts: Option<f64>,
}

impl QueueStats {
    pub fn new(
        since: DateTime<Utc>,
        counts: QueueStatusCounts,
        average_processing_time_seconds: Option<f64>,
        average_attempts: Option<f64>,
    ) -> Self {
        Self {
            since,
            total: counts.total(),
            counts,
            average_processing_time_seconds,
            average_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatusCounts {
    pub pending: u64,
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
    pub bounced: u64,
}

impl DeliveryStatusCounts {
    pub fn add(&mut self, status: DeliveryStatus, n: u64) {
        match status {
            DeliveryStatus::Pending => self.pending += n,
            DeliveryStatus::Sent => self.sent += n,
            DeliveryStatus::Delivered => self.delivered += n,
            DeliveryStatus::Failed => self.failed += n,
            DeliveryStatus::Bounced => self.bounced += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.sent + self.delivered + self.failed + self.bounced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub since: DateTime<Utc>,
    pub counts: DeliveryStatusCounts,
    pub total: u64,
    pub average_retry_count: Option<f64>,
}

impl DeliveryStats {
    pub fn new(
        since: DateTime<Utc>,
        counts: DeliveryStatusCounts,
        average_retry_count: Option<f64>,
    ) -> Self {
        Self {
            since,
            total: counts.total(),
            counts,
            average_retry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_total_is_sum_of_partitions() {
        let mut counts = QueueStatusCounts::default();
        counts.add(QueueStatus::Pending, 3);
        counts.add(QueueStatus::Failed, 2);
        counts.add(QueueStatus::Completed, 5);

        let stats = QueueStats::new(Utc::now(), counts, None, Some(1.0));
        assert_eq!(stats.total, 10);
        assert_eq!(stats.counts.get(QueueStatus::Failed), 2);
    }

    #[test]
    fn delivery_total_is_sum_of_partitions() {
        let mut counts = DeliveryStatusCounts::default();
        counts.add(DeliveryStatus::Sent, 4);
        counts.add(DeliveryStatus::Bounced, 1);

        assert_eq!(DeliveryStats::new(Utc::now(), counts, None).total, 5);
    }
}
