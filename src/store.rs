// src/store.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{GridPulseError, GridPulseResult};
use crate::types::{Aggregation, DataPoint};

/// Trait for the time-series persistence backend.
///
/// The supervisor uses only `write_power`; the query half serves the HTTP
/// API. Writes are fire-and-forget from the caller's point of view: an
/// error is logged by the caller and never influences connection state.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Persist one power sample (watts) at the given time
    async fn write_power(&self, power: f64, timestamp: DateTime<Utc>) -> GridPulseResult<()>;

    /// Most recent power sample within the last hour, if any
    async fn current_power(&self) -> GridPulseResult<Option<DataPoint>>;

    /// Power aggregated per `interval` window over `[start, stop]`
    async fn power_history(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        interval: &str,
        aggregation: Aggregation,
    ) -> GridPulseResult<Vec<DataPoint>>;

    /// Energy (kWh) per `interval` window over `[start, stop]`, derived by
    /// integrating mean power divided by 1000 over each window
    async fn energy_history(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        interval: &str,
    ) -> GridPulseResult<Vec<DataPoint>>;

    /// Energy (kWh) per day over `[start, stop]`; partial days integrate
    /// over the data actually present
    async fn daily_energy(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> GridPulseResult<Vec<DataPoint>>;
}

/// Validate a window interval such as `30s`, `5m`, `1h` or `1d`.
///
/// Intervals are interpolated into store queries, so anything that is not a
/// plain integer-plus-unit is rejected up front.
pub fn validate_interval(interval: &str) -> GridPulseResult<&str> {
    // Split bytewise: the string comes straight from a query parameter and
    // may end mid-codepoint as far as str::split_at is concerned.
    let valid = match interval.as_bytes().split_last() {
        Some((b's' | b'm' | b'h' | b'd', digits)) if !digits.is_empty() => {
            digits.iter().all(u8::is_ascii_digit)
                && interval[..digits.len()].parse::<u32>().map(|n| n > 0).unwrap_or(false)
        }
        _ => false,
    };

    if valid {
        Ok(interval)
    } else {
        Err(GridPulseError::query(format!(
            "invalid interval '{}': expected <number><s|m|h|d>",
            interval
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_intervals() {
        for interval in ["30s", "1m", "5m", "15m", "1h", "12h", "1d"] {
            assert!(validate_interval(interval).is_ok(), "{}", interval);
        }
    }

    #[test]
    fn rejects_malformed_intervals() {
        for interval in ["", "m", "5", "5x", "-5m", "5mm", "1h)", "abc", "0m"] {
            assert!(validate_interval(interval).is_err(), "{}", interval);
        }
    }

    #[test]
    fn rejects_non_ascii_intervals() {
        // Must return an error, not trip over a multibyte final character.
        for interval in ["5µ", "µ", "5µm", "五m", "1h\u{fe0f}"] {
            assert!(validate_interval(interval).is_err(), "{}", interval);
        }
    }
}
