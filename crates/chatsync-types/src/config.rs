use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PLACEHOLDER_TITLE: &str = "New Chat";

/// Tunables of a sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A streaming message with no update for this long is force-finalized
    pub streaming_quiet_period_ms: u64,
    /// How often the abandoned-stream sweeper runs
    pub sweep_interval_ms: u64,
    pub placeholder_title: String,
    /// Capacity of the async mirror of the event bus
    pub event_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            streaming_quiet_period_ms: 30_000,
            sweep_interval_ms: 5_000,
            placeholder_title: DEFAULT_PLACEHOLDER_TITLE.to_string(),
            event_capacity: 1024,
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quiet_period(mut self, period: Duration) -> Self {
        self.streaming_quiet_period_ms = period.as_millis() as u64;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_placeholder_title(mut self, title: impl Into<String>) -> Self {
        self.placeholder_title = title.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.streaming_quiet_period_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Backoff policy for remote writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}
