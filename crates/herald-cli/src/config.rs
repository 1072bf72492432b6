use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use herald_core::RetryPolicy;
use herald_core::app::{AppConfig, WorkerConfig};

const DAY_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBackoff {
    Immediate,
    Exponential,
}

impl FromStr for RetryBackoff {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(RetryBackoff::Immediate),
            "exponential" => Ok(RetryBackoff::Exponential),
            other => bail!("invalid HERALD_RETRY_BACKOFF: {other} (expected immediate or exponential)"),
        }
    }
}

/// Runtime configuration, read from `HERALD_*` environment variables.
///
/// Every key is optional; see `.env.example` for defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Must differ between instances sharing a database; unset means a fresh ULID per process
    pub worker_prefix: Option<String>,
    pub workers: usize,
    pub batch_size: u32,
    pub poll_interval_ms: u64,
    pub lease_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub send_timeout_secs: u64,
    pub provider_max_retries: u32,
    pub retry_backoff: RetryBackoff,
    pub retry_base_secs: u64,
    pub queue_retention_days: u64,
    pub delivery_retention_days: u64,
    pub gc_interval_secs: u64,
    pub cancel_on_bounce: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://herald.db".to_string(),
            worker_prefix: None,
            workers: 2,
            batch_size: 10,
            poll_interval_ms: 1000,
            lease_timeout_secs: 300,
            sweep_interval_secs: 60,
            send_timeout_secs: 30,
            provider_max_retries: 2,
            retry_backoff: RetryBackoff::Immediate,
            retry_base_secs: 30,
            queue_retention_days: 30,
            delivery_retention_days: 90,
            gc_interval_secs: 3600,
            cancel_on_bounce: false,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: env::var("HERALD_DATABASE_URL").unwrap_or(defaults.database_url),
            worker_prefix: env::var("HERALD_WORKER_PREFIX")
                .ok()
                .map(|prefix| prefix.trim().to_string())
                .filter(|prefix| !prefix.is_empty()),
            workers: parse_env("HERALD_WORKERS", defaults.workers)?,
            batch_size: parse_env("HERALD_BATCH_SIZE", defaults.batch_size)?,
            poll_interval_ms: parse_env("HERALD_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            lease_timeout_secs: parse_env("HERALD_LEASE_TIMEOUT_SECS", defaults.lease_timeout_secs)?,
            sweep_interval_secs: parse_env("HERALD_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            send_timeout_secs: parse_env("HERALD_SEND_TIMEOUT_SECS", defaults.send_timeout_secs)?,
            provider_max_retries: parse_env("HERALD_PROVIDER_MAX_RETRIES", defaults.provider_max_retries)?,
            retry_backoff: parse_env("HERALD_RETRY_BACKOFF", defaults.retry_backoff)?,
            retry_base_secs: parse_env("HERALD_RETRY_BASE_SECS", defaults.retry_base_secs)?,
            queue_retention_days: parse_env("HERALD_QUEUE_RETENTION_DAYS", defaults.queue_retention_days)?,
            delivery_retention_days: parse_env(
                "HERALD_DELIVERY_RETENTION_DAYS",
                defaults.delivery_retention_days,
            )?,
            gc_interval_secs: parse_env("HERALD_GC_INTERVAL_SECS", defaults.gc_interval_secs)?,
            cancel_on_bounce: parse_env("HERALD_CANCEL_ON_BOUNCE", defaults.cancel_on_bounce)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.retry_backoff {
            RetryBackoff::Immediate => RetryPolicy::Immediate,
            RetryBackoff::Exponential => {
                RetryPolicy::exponential(Duration::from_secs(self.retry_base_secs))
            }
        }
    }

    pub fn app_config(&self) -> AppConfig {
        let defaults = AppConfig::default();
        AppConfig {
            worker_prefix: self.worker_prefix.clone().unwrap_or(defaults.worker_prefix),
            workers: self.workers,
            worker: WorkerConfig {
                batch_size: self.batch_size,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                send_timeout: Duration::from_secs(self.send_timeout_secs),
                provider_max_retries: self.provider_max_retries,
                cancel_on_bounce: self.cancel_on_bounce,
                ..WorkerConfig::default()
            },
            retry: self.retry_policy(),
            lease_timeout: Duration::from_secs(self.lease_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            queue_retention: Duration::from_secs(self.queue_retention_days.saturating_mul(DAY_SECS)),
            delivery_retention: Duration::from_secs(
                self.delivery_retention_days.saturating_mul(DAY_SECS),
            ),
            gc_interval: Duration::from_secs(self.gc_interval_secs),
            ..defaults
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_the_lease_check() {
        let config = Config::default().app_config();
        assert!(config.lease_timeout > config.worker.worst_case_item());
    }

    #[test]
    fn backoff_parses() {
        assert_eq!("exponential".parse::<RetryBackoff>().unwrap(), RetryBackoff::Exponential);
        assert!("linear".parse::<RetryBackoff>().is_err());
    }

    #[test]
    fn exponential_policy_uses_base_secs() {
        let config = Config {
            retry_backoff: RetryBackoff::Exponential,
            retry_base_secs: 10,
            ..Config::default()
        };
        assert_eq!(config.retry_policy().next_delay(1), Some(Duration::from_secs(10)));
    }

    #[test]
    fn worker_prefix_overrides_generated_default() {
        let named = Config {
            worker_prefix: Some("branch-north".to_string()),
            ..Config::default()
        };
        assert_eq!(named.app_config().worker_prefix, "branch-north");

        let unnamed = Config::default();
        assert_ne!(
            unnamed.app_config().worker_prefix,
            unnamed.app_config().worker_prefix
        );
    }

    #[test]
    fn huge_retention_saturates_instead_of_overflowing() {
        let config = Config {
            queue_retention_days: u64::MAX,
            delivery_retention_days: u64::MAX / 2,
            ..Config::default()
        };

        let app = config.app_config();

        assert_eq!(app.queue_retention, Duration::from_secs(u64::MAX));
        assert_eq!(app.delivery_retention, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn missing_key_falls_back_to_default() {
        let value: u32 = parse_env("HERALD_TEST_SURELY_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
    }
}
