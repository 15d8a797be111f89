// crates/core/src/config.rs
//! Timing, probability and retry settings for the job subsystem.
//!
//! Defaults reproduce the behaviour of the simulated worker; tests shrink
//! ranges to single values and set rates to 0 or 1 to force outcomes.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Inclusive millisecond range for randomized delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MillisRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl MillisRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.min_ms > self.max_ms {
            return Err(ConfigError::InvertedRange {
                field,
                min: self.min_ms as f64,
                max: self.max_ms as f64,
            });
        }
        Ok(())
    }
}

/// Multiplier applied to progress increments once progress exceeds `above`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlowdownStep {
    pub above: u8,
    pub factor: f64,
}

/// Job lifecycle timing and outcome settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub pending_to_queue_delay: MillisRange,
    pub queue_to_running_delay: MillisRange,
    pub progress_tick_interval_ms: u64,
    /// Base increment per tick, drawn uniformly from `[min, max)`.
    pub progress_increment_min: f64,
    pub progress_increment_max: f64,
    /// The step with the highest `above` that progress exceeds wins.
    pub slowdown: Vec<SlowdownStep>,
    pub completion_grace_delay: MillisRange,
    /// Probability that a job reaching 100% ends `Completed` rather than `Failed`.
    pub success_rate: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            pending_to_queue_delay: MillisRange::new(1_000, 4_000),
            queue_to_running_delay: MillisRange::new(2_000, 6_000),
            progress_tick_interval_ms: 1_500,
            progress_increment_min: 3.0,
            progress_increment_max: 12.0,
            slowdown: vec![
                SlowdownStep {
                    above: 60,
                    factor: 0.7,
                },
                SlowdownStep {
                    above: 80,
                    factor: 0.5,
                },
            ],
            completion_grace_delay: MillisRange::new(500, 1_500),
            success_rate: 0.75,
        }
    }
}

impl LifecycleConfig {
    pub fn progress_tick_interval(&self) -> Duration {
        Duration::from_millis(self.progress_tick_interval_ms)
    }

    /// Slowdown multiplier for a job currently at `progress`.
    pub fn slowdown_factor(&self, progress: u8) -> f64 {
        self.slowdown
            .iter()
            .filter(|step| progress > step.above)
            .max_by_key(|step| step.above)
            .map_or(1.0, |step| step.factor)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pending_to_queue_delay.validate("pending_to_queue_delay")?;
        self.queue_to_running_delay.validate("queue_to_running_delay")?;
        self.completion_grace_delay.validate("completion_grace_delay")?;
        if self.progress_tick_interval_ms == 0 {
            return Err(ConfigError::Zero("progress_tick_interval_ms"));
        }
        if self.progress_increment_min > self.progress_increment_max {
            return Err(ConfigError::InvertedRange {
                field: "progress_increment",
                min: self.progress_increment_min,
                max: self.progress_increment_max,
            });
        }
        if self.progress_increment_max <= 0.0 {
            return Err(ConfigError::Zero("progress_increment_max"));
        }
        check_rate("success_rate", self.success_rate)
    }
}

/// Progress event delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub packet_loss_rate: f64,
    pub delivery_delay: MillisRange,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            packet_loss_rate: 0.02,
            delivery_delay: MillisRange::new(50, 350),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.delivery_delay.validate("delivery_delay")?;
        check_rate("packet_loss_rate", self.packet_loss_rate)
    }
}

/// Reconnection policy for the live-updates channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub max_failed_attempts: u32,
    /// Delay before retry `n` is `retry_delays_ms[n]`; the last entry repeats.
    pub retry_delays_ms: Vec<u64>,
    /// Upper bound of the uniform jitter added to each retry delay.
    pub retry_jitter_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            max_failed_attempts: 5,
            retry_delays_ms: vec![0, 2_000, 10_000, 30_000],
            retry_jitter_ms: 0,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Base delay for the retry following `previous_retry_count` earlier retries.
    pub fn retry_delay(&self, previous_retry_count: usize) -> Duration {
        let idx = previous_retry_count.min(self.retry_delays_ms.len().saturating_sub(1));
        Duration::from_millis(self.retry_delays_ms.get(idx).copied().unwrap_or(0))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Zero("connect_timeout_ms"));
        }
        if self.max_failed_attempts == 0 {
            return Err(ConfigError::Zero("max_failed_attempts"));
        }
        if self.retry_delays_ms.is_empty() {
            return Err(ConfigError::EmptyRetryTable);
        }
        Ok(())
    }
}

/// Behaviour of the built-in simulated transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedLinkConfig {
    pub handshake_latency: MillisRange,
    pub failure_rate: f64,
    /// Zero disables heartbeat drops.
    pub heartbeat_interval_ms: u64,
    pub heartbeat_drop_rate: f64,
}

impl Default for SimulatedLinkConfig {
    fn default() -> Self {
        Self {
            handshake_latency: MillisRange::new(500, 2_500),
            failure_rate: 0.1,
            heartbeat_interval_ms: 10_000,
            heartbeat_drop_rate: 0.01,
        }
    }
}

impl SimulatedLinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.handshake_latency.validate("handshake_latency")?;
        check_rate("failure_rate", self.failure_rate)?;
        check_rate("heartbeat_drop_rate", self.heartbeat_drop_rate)
    }
}

/// Complete configuration for a [`crate::JobService`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub lifecycle: LifecycleConfig,
    pub bus: BusConfig,
    pub connection: ConnectionConfig,
    pub link: SimulatedLinkConfig,
    /// Seed for every random draw; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl DashboardConfig {
    /// Defaults overridden by `JOBPULSE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("JOBPULSE_SUCCESS_RATE") {
            config.lifecycle.success_rate = v;
        }
        if let Some(v) = env_parse("JOBPULSE_TICK_MS") {
            config.lifecycle.progress_tick_interval_ms = v;
        }
        if let Some(v) = env_parse("JOBPULSE_PACKET_LOSS_RATE") {
            config.bus.packet_loss_rate = v;
        }
        if let Some(v) = env_parse("JOBPULSE_MAX_FAILED_ATTEMPTS") {
            config.connection.max_failed_attempts = v;
        }
        if let Some(v) = env_parse("JOBPULSE_CONNECT_TIMEOUT_MS") {
            config.connection.connect_timeout_ms = v;
        }
        if let Some(v) = env_parse("JOBPULSE_SEED") {
            config.seed = Some(v);
        }
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lifecycle.validate()?;
        self.bus.validate()?;
        self.connection.validate()?;
        self.link.validate()
    }
}

fn check_rate(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::RateOutOfBounds { field, value });
    }
    Ok(())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
