// src/api.rs

//! HTTP query surface.
//!
//! Thin parameter validation over the store's query API, wrapped in a
//! `{success, data}` / `{success: false, error}` envelope. Missing or
//! malformed parameters map to 400, store failures to 500; a query error
//! never affects the ingestion side of the process.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Months, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::error::GridPulseError;
use crate::store::SampleStore;
use crate::supervisor::SupervisorHandle;
use crate::types::Aggregation;

/// Shared state for the query handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SampleStore>,
    pub supervisor: SupervisorHandle,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/current", get(current))
        .route("/api/power", get(power_window))
        .route("/api/power/history", get(power_history))
        .route("/api/power/today", get(power_today))
        .route("/api/power/week", get(power_week))
        .route("/api/energy/history", get(energy_history))
        .route("/api/energy/today", get(energy_today))
        .route("/api/energy/today/hourly", get(energy_today_hourly))
        .route("/api/energy/week", get(energy_week))
        .route("/api/energy/daily/12months", get(energy_daily_year))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// An error response in the standard envelope
struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl ApiFailure {
    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<GridPulseError> for ApiFailure {
    fn from(e: GridPulseError) -> Self {
        let status = match e {
            GridPulseError::Query { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Query failed: {}", e);
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

fn envelope<T: serde::Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    start: Option<String>,
    stop: Option<String>,
    interval: Option<String>,
    aggregation: Option<Aggregation>,
}

#[derive(Debug, Deserialize)]
struct WindowParams {
    range: Option<String>,
    interval: Option<String>,
}

fn parse_time(raw: &str, name: &str) -> Result<DateTime<Utc>, ApiFailure> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiFailure::bad_request(format!("{} must be an ISO 8601 timestamp", name)))
}

/// Resolve required start/stop parameters from a history request
fn required_range(params: &HistoryParams) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiFailure> {
    match (&params.start, &params.stop) {
        (Some(start), Some(stop)) => Ok((parse_time(start, "start")?, parse_time(stop, "stop")?)),
        _ => Err(ApiFailure::bad_request(
            "start and stop parameters are required (ISO 8601 format)",
        )),
    }
}

fn today_start() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}

async fn current(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiFailure> {
    let point = state.store.current_power().await?;
    match point {
        Some(point) => Ok(envelope(point)),
        None => Ok(envelope(json!({ "value": null, "timestamp": null }))),
    }
}

async fn power_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let (start, stop) = required_range(&params)?;
    let interval = params.interval.as_deref().unwrap_or("1m");
    let aggregation = params.aggregation.unwrap_or_default();
    let data = state
        .store
        .power_history(start, stop, interval, aggregation)
        .await?;
    Ok(envelope(data))
}

async fn energy_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let (start, stop) = required_range(&params)?;
    let interval = params.interval.as_deref().unwrap_or("1h");
    let data = state.store.energy_history(start, stop, interval).await?;
    Ok(envelope(data))
}

const VALID_RANGES: [(&str, i64); 5] = [
    ("5m", 5),
    ("1h", 60),
    ("3h", 3 * 60),
    ("12h", 12 * 60),
    ("24h", 24 * 60),
];

/// Flexible power endpoint: `/api/power?range=5m&interval=1m`
async fn power_window(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let range = params.range.as_deref().unwrap_or("1h");
    let interval = params.interval.as_deref().unwrap_or("1m");

    let minutes = VALID_RANGES
        .iter()
        .find(|(name, _)| *name == range)
        .map(|(_, minutes)| *minutes)
        .ok_or_else(|| {
            let names: Vec<&str> = VALID_RANGES.iter().map(|(name, _)| *name).collect();
            ApiFailure::bad_request(format!(
                "Invalid range. Must be one of: {}",
                names.join(", ")
            ))
        })?;

    let stop = Utc::now();
    let start = stop - ChronoDuration::minutes(minutes);
    let data = state
        .store
        .power_history(start, stop, interval, Aggregation::Max)
        .await?;
    let count = data.len();

    Ok(Json(json!({
        "success": true,
        "data": data,
        "meta": {
            "range": range,
            "interval": interval,
            "start": start,
            "stop": stop,
            "count": count,
        }
    })))
}

async fn power_today(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiFailure> {
    let data = state
        .store
        .power_history(today_start(), Utc::now(), "5m", Aggregation::Max)
        .await?;
    Ok(envelope(data))
}

async fn power_week(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiFailure> {
    let stop = Utc::now();
    let data = state
        .store
        .power_history(stop - ChronoDuration::days(7), stop, "1h", Aggregation::Max)
        .await?;
    Ok(envelope(data))
}

async fn energy_today(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let data = state
        .store
        .energy_history(today_start(), Utc::now(), "15m")
        .await?;
    Ok(envelope(data))
}

/// Per-hour kWh since midnight; the granularity the dashboard's daily
/// breakdown chart consumes
async fn energy_today_hourly(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let data = state
        .store
        .energy_history(today_start(), Utc::now(), "1h")
        .await?;
    Ok(envelope(data))
}

async fn energy_week(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiFailure> {
    let stop = Utc::now();
    let data = state
        .store
        .energy_history(stop - ChronoDuration::days(7), stop, "1h")
        .await?;
    Ok(envelope(data))
}

/// Daily kWh rollup for the last 12 months of full days
async fn energy_daily_year(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let now = Utc::now();
    let this_month = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .expect("first of the month is always valid");
    let start = this_month
        .checked_sub_months(Months::new(12))
        .unwrap_or(this_month)
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    // End of yesterday: the current day is still accumulating.
    let stop = today_start();

    let data = state.store.daily_energy(start, stop).await?;
    Ok(envelope(data))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let feed = match state.supervisor.status().await {
        Ok(status) => json!(status),
        Err(_) => serde_json::Value::Null,
    };
    Json(json!({
        "success": true,
        "status": "healthy",
        "timestamp": Utc::now(),
        "feed": feed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GridPulseResult;
    use crate::feed::{FeedConnector, FeedEventSender, FeedSession};
    use crate::supervisor::Supervisor;
    use crate::types::{DataPoint, Epoch, SupervisorConfig};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    /// Store stub: either returns one fixed point or fails every call
    struct StubStore {
        fail: bool,
    }

    impl StubStore {
        fn ok() -> Self {
            Self { fail: false }
        }

        fn failing() -> Self {
            Self { fail: true }
        }

        fn point() -> DataPoint {
            DataPoint {
                value: 420.0,
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            }
        }

        fn result<T>(&self, value: T) -> GridPulseResult<T> {
            if self.fail {
                Err(GridPulseError::store("store unreachable"))
            } else {
                Ok(value)
            }
        }
    }

    #[async_trait]
    impl SampleStore for StubStore {
        async fn write_power(&self, _power: f64, _timestamp: DateTime<Utc>) -> GridPulseResult<()> {
            self.result(())
        }

        async fn current_power(&self) -> GridPulseResult<Option<DataPoint>> {
            self.result(Some(Self::point()))
        }

        async fn power_history(
            &self,
            _start: DateTime<Utc>,
            _stop: DateTime<Utc>,
            interval: &str,
            _aggregation: Aggregation,
        ) -> GridPulseResult<Vec<DataPoint>> {
            crate::store::validate_interval(interval)?;
            self.result(vec![Self::point()])
        }

        async fn energy_history(
            &self,
            _start: DateTime<Utc>,
            _stop: DateTime<Utc>,
            interval: &str,
        ) -> GridPulseResult<Vec<DataPoint>> {
            crate::store::validate_interval(interval)?;
            self.result(vec![Self::point()])
        }

        async fn daily_energy(
            &self,
            _start: DateTime<Utc>,
            _stop: DateTime<Utc>,
        ) -> GridPulseResult<Vec<DataPoint>> {
            self.result(vec![Self::point()])
        }
    }

    /// Connector stub that never produces a session
    struct NeverConnector;

    #[async_trait]
    impl FeedConnector for NeverConnector {
        async fn connect(
            &self,
            _epoch: Epoch,
            _events: FeedEventSender,
        ) -> GridPulseResult<Box<dyn FeedSession>> {
            Err(GridPulseError::feed("not in this test"))
        }
    }

    fn test_app(store: StubStore) -> Router {
        let supervisor = Supervisor::new(
            SupervisorConfig::default(),
            Arc::new(NeverConnector),
            Arc::new(StubStore::ok()),
        );
        let handle = supervisor.handle();
        tokio::spawn(supervisor.start());
        router(AppState {
            store: Arc::new(store),
            supervisor: handle,
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap();
        (status, value)
    }

    #[tokio::test]
    async fn current_returns_envelope() {
        let (status, body) = get_json(test_app(StubStore::ok()), "/api/current").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["value"], 420.0);
    }

    #[tokio::test]
    async fn history_requires_start_and_stop() {
        let (status, body) = get_json(test_app(StubStore::ok()), "/api/power/history").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("start and stop"));

        let (status, _) = get_json(
            test_app(StubStore::ok()),
            "/api/energy/history?start=2024-03-01T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn history_rejects_malformed_timestamps() {
        let (status, body) = get_json(
            test_app(StubStore::ok()),
            "/api/power/history?start=yesterday&stop=2024-03-01T12:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("ISO 8601"));
    }

    #[tokio::test]
    async fn history_with_valid_range_succeeds() {
        let (status, body) = get_json(
            test_app(StubStore::ok()),
            "/api/power/history?start=2024-03-01T00:00:00Z&stop=2024-03-01T12:00:00Z&interval=5m&aggregation=mean",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn window_rejects_unknown_range() {
        let (status, body) = get_json(test_app(StubStore::ok()), "/api/power?range=2h").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid range"));
    }

    #[tokio::test]
    async fn window_reports_meta() {
        let (status, body) =
            get_json(test_app(StubStore::ok()), "/api/power?range=5m&interval=1m").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["range"], "5m");
        assert_eq!(body["meta"]["count"], 1);
    }

    #[tokio::test]
    async fn bad_interval_is_a_400() {
        let (status, _) = get_json(
            test_app(StubStore::ok()),
            "/api/power/history?start=2024-03-01T00:00:00Z&stop=2024-03-01T12:00:00Z&interval=5m%29",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_ascii_interval_is_a_400() {
        // "5µ" percent-encoded; must come back as a clean query error
        let (status, body) = get_json(
            test_app(StubStore::ok()),
            "/api/power/history?start=2024-03-01T00:00:00Z&stop=2024-03-01T12:00:00Z&interval=5%C2%B5",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn store_failure_is_a_500() {
        let (status, body) = get_json(test_app(StubStore::failing()), "/api/current").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("store unreachable"));
    }

    #[tokio::test]
    async fn health_reports_feed_status() {
        let (status, body) = get_json(test_app(StubStore::ok()), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "healthy");
        assert!(body["feed"]["state"].is_string());
    }

    #[tokio::test]
    async fn convenience_endpoints_succeed() {
        for uri in [
            "/api/power/today",
            "/api/power/week",
            "/api/energy/today",
            "/api/energy/today/hourly",
            "/api/energy/week",
            "/api/energy/daily/12months",
        ] {
            let (status, body) = get_json(test_app(StubStore::ok()), uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(body["success"], true, "{}", uri);
        }
    }
}
