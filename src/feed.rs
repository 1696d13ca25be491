// src/feed.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::GridPulseResult;
use crate::types::Epoch;

/// A raw measurement as delivered by the upstream feed.
///
/// Decoding is deliberately lenient: upstream payloads occasionally carry a
/// null or non-numeric power field, and those must be representable so the
/// supervisor can discard them instead of tearing the session down.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    /// Instantaneous power draw in watts, if the payload carried a usable one
    pub power: Option<f64>,
    /// Measurement time as reported upstream
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawSample {
    /// Decode a measurement from an upstream JSON payload.
    ///
    /// Non-numeric, missing, NaN or infinite power values map to `None`.
    pub fn from_json(value: &Value) -> Self {
        let power = value
            .get("power")
            .and_then(Value::as_f64)
            .filter(|p| p.is_finite());
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        Self { power, timestamp }
    }
}

/// What happened on a feed session
#[derive(Debug, Clone)]
pub enum FeedEventKind {
    /// The session is established and subscribed
    Connected,
    /// The session ended; carries the reason when the transport gave one
    Disconnected(Option<String>),
    /// A non-fatal error was reported; the session may still recover
    Error(String),
    /// A measurement arrived
    Data(RawSample),
}

/// A lifecycle event from one feed session.
///
/// Every event carries the epoch of the session that produced it. The
/// supervisor compares it against its current epoch and drops mismatches,
/// so a superseded session can never poison state even if its events are
/// still in flight when it is torn down.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub epoch: Epoch,
    pub kind: FeedEventKind,
}

impl FeedEvent {
    pub fn new(epoch: Epoch, kind: FeedEventKind) -> Self {
        Self { epoch, kind }
    }
}

/// Sender half used by feed sessions to deliver events to the supervisor
pub type FeedEventSender = mpsc::UnboundedSender<FeedEvent>;

/// A live streaming session to the upstream provider.
///
/// Returned by a [`FeedConnector`]; the supervisor owns at most one at a
/// time and closes it during teardown.
#[async_trait]
pub trait FeedSession: Send {
    /// Close the session. Best-effort and idempotent; events already in
    /// flight may still be delivered and are filtered by epoch.
    async fn close(&mut self);
}

/// Factory for feed sessions.
///
/// Implement this to integrate an upstream provider. The connector must tag
/// every event it emits with the epoch it was given; the sender stays valid
/// for the lifetime of the supervisor.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Establish one streaming session.
    ///
    /// # Returns
    /// * `Ok(session)` - the transport is up; `Connected` is emitted once the
    ///   subscription is acknowledged
    /// * `Err(error)` - construction failed; the supervisor treats this as an
    ///   immediate disconnect and schedules a reconnect
    async fn connect(
        &self,
        epoch: Epoch,
        events: FeedEventSender,
    ) -> GridPulseResult<Box<dyn FeedSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_numeric_power() {
        let sample = RawSample::from_json(&json!({
            "power": 42.5,
            "timestamp": "2024-03-01T12:00:00.000Z"
        }));
        assert_eq!(sample.power, Some(42.5));
        assert!(sample.timestamp.is_some());
    }

    #[test]
    fn rejects_non_numeric_power() {
        let sample = RawSample::from_json(&json!({ "power": "abc" }));
        assert_eq!(sample.power, None);

        let sample = RawSample::from_json(&json!({ "power": null }));
        assert_eq!(sample.power, None);

        let sample = RawSample::from_json(&json!({}));
        assert_eq!(sample.power, None);
    }

    #[test]
    fn tolerates_missing_or_bad_timestamp() {
        let sample = RawSample::from_json(&json!({ "power": 100.0 }));
        assert_eq!(sample.power, Some(100.0));
        assert_eq!(sample.timestamp, None);

        let sample = RawSample::from_json(&json!({
            "power": 100.0,
            "timestamp": "not-a-time"
        }));
        assert_eq!(sample.timestamp, None);
    }
}
