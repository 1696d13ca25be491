// src/types.rs

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one connection attempt. Monotonically assigned by the
/// supervisor; events tagged with a non-current epoch are dropped.
pub type Epoch = u64;

/// A single aggregated value from the time-series store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Aggregated value (watts for power queries, kWh for energy queries)
    pub value: f64,
    /// End of the aggregation window this value belongs to
    pub timestamp: DateTime<Utc>,
}

/// Aggregation function applied to a power-history window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Max,
    Mean,
    Min,
}

impl Aggregation {
    /// Flux function name
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Max => "max",
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
        }
    }
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Max
    }
}

/// Lifecycle state of the connection supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// No session and no reconnect scheduled
    Idle,
    /// A session is being established; no `connected` event seen yet
    Connecting,
    /// Session established and (as far as we know) delivering data
    Live,
    /// Waiting out the backoff delay before the next attempt
    ReconnectWait,
    /// Attempt budget exhausted; waiting out the long cooldown
    Backoff,
}

/// Snapshot of supervisor state, served over the status/health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub is_connected: bool,
    pub current_epoch: Epoch,
    pub reconnect_attempts: u32,
    /// Milliseconds since the last accepted sample, if any was ever accepted
    pub last_data_age_ms: Option<u64>,
    /// Samples forwarded to the store since startup
    pub samples_forwarded: u64,
}

/// Tuning knobs for the connection supervisor.
///
/// The defaults are the production values; tests shrink them through the
/// builder to keep simulated clocks readable.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Floor delay before the first reconnect attempt
    pub reconnect_floor: Duration,
    /// Upper bound on the exponential backoff delay
    pub reconnect_cap: Duration,
    /// Attempts allowed before entering the long cooldown
    pub max_reconnect_attempts: u32,
    /// Cooldown after the attempt budget is exhausted
    pub retry_cooldown: Duration,
    /// How often the health check runs while live
    pub health_check_interval: Duration,
    /// Data silence tolerated before the session is declared dead
    pub staleness_threshold: Duration,
    /// Settle time after closing an old session before opening a new one
    pub teardown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_floor: Duration::from_secs(5),
            reconnect_cap: Duration::from_secs(60),
            max_reconnect_attempts: 10,
            retry_cooldown: Duration::from_secs(5 * 60),
            health_check_interval: Duration::from_secs(2 * 60),
            staleness_threshold: Duration::from_secs(3 * 60),
            teardown_grace: Duration::from_secs(1),
        }
    }
}

impl SupervisorConfig {
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::new()
    }
}

/// Builder for supervisor configurations
#[derive(Debug)]
pub struct SupervisorConfigBuilder {
    config: SupervisorConfig,
}

impl SupervisorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SupervisorConfig::default(),
        }
    }

    pub fn reconnect_floor(mut self, floor: Duration) -> Self {
        self.config.reconnect_floor = floor;
        self
    }

    pub fn reconnect_cap(mut self, cap: Duration) -> Self {
        self.config.reconnect_cap = cap;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.retry_cooldown = cooldown;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    pub fn staleness_threshold(mut self, threshold: Duration) -> Self {
        self.config.staleness_threshold = threshold;
        self
    }

    pub fn teardown_grace(mut self, grace: Duration) -> Self {
        self.config.teardown_grace = grace;
        self
    }

    pub fn build(self) -> SupervisorConfig {
        self.config
    }
}

impl Default for SupervisorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
