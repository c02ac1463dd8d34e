use std::time::Duration;

use adrules_core::config::{read_env, read_env_millis, read_env_secs};
use adrules_core::ConfigError;
use serde::{Deserialize, Serialize};

/// Tuning knobs for the dispatcher, workers and connector calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub workers: usize,
    /// How often the dispatcher loop wakes up.
    pub tick_interval: Duration,
    /// Poll period for SCHEDULE rules.
    pub schedule_interval: Duration,
    /// Fallback poll period for TRIGGER rules.
    pub trigger_interval: Duration,
    /// Base URL of the ad-platform connector service. `None` runs against
    /// the in-memory simulator.
    pub connector_base_url: Option<String>,
    pub connector_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    /// Webhook receiving NOTIFICATION deliveries. Without one, notifications
    /// are only logged.
    pub notification_webhook: Option<String>,
    /// Platform minimum daily budget, in minor units.
    pub min_budget: i64,
    /// Platform minimum bid, in minor units.
    pub min_bid: i64,
    /// Capacity of the snapshot event channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            tick_interval: Duration::from_secs(5),
            schedule_interval: Duration::from_secs(10 * 60),
            trigger_interval: Duration::from_secs(60),
            connector_base_url: None,
            connector_timeout: Duration::from_secs(15),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            notification_webhook: None,
            min_budget: 100,
            min_bid: 1,
            event_buffer: 1024,
        }
    }
}

impl EngineConfig {
    /// Loads the engine settings from `ADRULES_*` variables, keeping defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix("ADRULES_")
    }

    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{prefix}{suffix}");
        let defaults = Self::default();

        let config = Self {
            workers: read_env(&key("WORKERS"))?.unwrap_or(defaults.workers),
            tick_interval: read_env_millis(&key("TICK_INTERVAL_MS"))?.unwrap_or(defaults.tick_interval),
            schedule_interval: read_env_secs(&key("SCHEDULE_INTERVAL_SECS"))?
                .unwrap_or(defaults.schedule_interval),
            trigger_interval: read_env_secs(&key("TRIGGER_INTERVAL_SECS"))?
                .unwrap_or(defaults.trigger_interval),
            connector_base_url: read_env(&key("CONNECTOR_URL"))?,
            connector_timeout: read_env_secs(&key("CONNECTOR_TIMEOUT_SECS"))?
                .unwrap_or(defaults.connector_timeout),
            retry_attempts: read_env(&key("RETRY_ATTEMPTS"))?.unwrap_or(defaults.retry_attempts),
            retry_backoff: read_env_millis(&key("RETRY_BACKOFF_MS"))?.unwrap_or(defaults.retry_backoff),
            notification_webhook: read_env(&key("NOTIFICATION_WEBHOOK"))?,
            min_budget: read_env(&key("MIN_BUDGET"))?.unwrap_or(defaults.min_budget),
            min_bid: read_env(&key("MIN_BID"))?.unwrap_or(defaults.min_bid),
            event_buffer: read_env(&key("EVENT_BUFFER"))?.unwrap_or(defaults.event_buffer),
        };
        config.validate(prefix)?;
        Ok(config)
    }

    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        let invalid = |suffix: &str, value: String| ConfigError::InvalidValue {
            key: format!("{prefix}{suffix}"),
            value,
        };
        if self.workers == 0 {
            return Err(invalid("WORKERS", "0".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(invalid("TICK_INTERVAL_MS", "0".into()));
        }
        if self.retry_attempts == 0 {
            return Err(invalid("RETRY_ATTEMPTS", "0".into()));
        }
        if self.min_budget <= 0 {
            return Err(invalid("MIN_BUDGET", self.min_budget.to_string()));
        }
        if self.min_bid <= 0 {
            return Err(invalid("MIN_BID", self.min_bid.to_string()));
        }
        Ok(())
    }
}
