//! Retry policy: decides how far to push `scheduled_for` after a retryable failure.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Retry policy for failed queue items.
///
/// `Immediate` leaves `scheduled_for` untouched, so the item is claimable on
/// the very next poll. `Exponential` pushes it to `now + delay`.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    Immediate,
    Exponential {
        /// Delay after the first failure.
        base_delay: Duration,
        multiplier: f64,
        /// Upper bound for any single delay.
        max_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Immediate
    }
}

impl RetryPolicy {
    pub fn exponential(base_delay: Duration) -> Self {
        RetryPolicy::Exponential {
            base_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(60 * 60),
        }
    }

    /// Delay before the next claim, given the attempt count *after* the failure
    /// was recorded (1 for the first failure).
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at max_delay.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        match self {
            RetryPolicy::Immediate => None,
            RetryPolicy::Exponential {
                base_delay,
                multiplier,
                max_delay,
            } => {
                let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = base_delay.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() {
                    return Some(*max_delay);
                }
                // a negative multiplier flips the sign on odd exponents
                let capped = secs.max(0.0).min(max_delay.as_secs_f64());
                Some(Duration::try_from_secs_f64(capped).unwrap_or(*max_delay))
            }
        }
    }

    /// New `scheduled_for` for a retried item, or `None` to leave it as is.
    pub fn next_run_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = chrono::Duration::from_std(self.next_delay(attempts)?).ok()?;
        now.checked_add_signed(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_policy_never_delays() {
        assert_eq!(RetryPolicy::Immediate.next_delay(1), None);
        assert_eq!(RetryPolicy::default().next_delay(7), None);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::exponential(Duration::from_secs(2));

        // base=2s, multiplier=2.0: 2s, 4s, 8s
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(8)));
    }

    #[test]
    fn next_run_at_offsets_from_now() {
        use chrono::TimeZone;
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let policy = RetryPolicy::exponential(Duration::from_secs(5));

        assert_eq!(policy.next_run_at(2, now), Some(now + chrono::Duration::seconds(10)));
        assert_eq!(RetryPolicy::Immediate.next_run_at(2, now), None);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::Exponential {
            base_delay: Duration::from_secs(10),
            multiplier: 10.0,
            max_delay: Duration::from_secs(120),
        };

        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(100)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(120)));
        assert_eq!(policy.next_delay(u32::MAX), Some(Duration::from_secs(120)));
    }

    #[test]
    fn out_of_range_fields_never_panic() {
        let negative = RetryPolicy::Exponential {
            base_delay: Duration::from_secs(10),
            multiplier: -3.0,
            max_delay: Duration::from_secs(120),
        };
        assert_eq!(negative.next_delay(2), Some(Duration::ZERO));
        assert_eq!(negative.next_delay(3), Some(Duration::from_secs(90)));

        let no_room = RetryPolicy::Exponential {
            base_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_delay: Duration::ZERO,
        };
        assert_eq!(no_room.next_delay(4), Some(Duration::ZERO));

        let unbounded = RetryPolicy::Exponential {
            base_delay: Duration::from_secs(10),
            multiplier: f64::NAN,
            max_delay: Duration::MAX,
        };
        assert_eq!(unbounded.next_delay(2), Some(Duration::MAX));
    }
}
