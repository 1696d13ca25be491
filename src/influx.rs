// src/influx.rs

//! InfluxDB 2.x implementation of the [`SampleStore`] seam.
//!
//! Samples are written as line protocol (measurement `Power`, field
//! `value`, millisecond precision) and read back through Flux queries whose
//! annotated-CSV results are reduced to `(value, timestamp)` pairs. Energy
//! series are derived in the store by integrating mean power divided by
//! 1000 over the window, in kWh.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::config::InfluxConfig;
use crate::error::{GridPulseError, GridPulseResult};
use crate::store::{validate_interval, SampleStore};
use crate::types::{Aggregation, DataPoint};

/// HTTP client for one InfluxDB org/bucket
pub struct InfluxStore {
    client: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxStore {
    pub fn new(config: &InfluxConfig) -> GridPulseResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        })
    }

    async fn run_query(&self, flux: String) -> GridPulseResult<Vec<DataPoint>> {
        debug!(%flux, "Running store query");
        let response = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .json(&serde_json::json!({ "query": flux, "type": "flux" }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GridPulseError::store(format!(
                "query failed with {}: {}",
                status, body
            )));
        }

        Ok(parse_annotated_csv(&response.text().await?))
    }

    fn range_clause(start: DateTime<Utc>, stop: DateTime<Utc>) -> String {
        format!(
            "range(start: {}, stop: {})",
            start.to_rfc3339_opts(SecondsFormat::Millis, true),
            stop.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

#[async_trait]
impl SampleStore for InfluxStore {
    async fn write_power(&self, power: f64, timestamp: DateTime<Utc>) -> GridPulseResult<()> {
        let line = format!("Power value={} {}", power, timestamp.timestamp_millis());

        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GridPulseError::store(format!(
                "write rejected with {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn current_power(&self) -> GridPulseResult<Option<DataPoint>> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> range(start: -1h)
  |> filter(fn: (r) => r._measurement == "Power")
  |> filter(fn: (r) => r._field == "value")
  |> last()"#,
            bucket = self.bucket
        );
        Ok(self.run_query(flux).await?.into_iter().next())
    }

    async fn power_history(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        interval: &str,
        aggregation: Aggregation,
    ) -> GridPulseResult<Vec<DataPoint>> {
        let interval = validate_interval(interval)?;
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> {range}
  |> filter(fn: (r) => r._measurement == "Power")
  |> filter(fn: (r) => r._field == "value")
  |> aggregateWindow(every: {interval}, fn: {agg}, createEmpty: false)"#,
            bucket = self.bucket,
            range = Self::range_clause(start, stop),
            interval = interval,
            agg = aggregation.as_str(),
        );
        self.run_query(flux).await
    }

    async fn energy_history(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        interval: &str,
    ) -> GridPulseResult<Vec<DataPoint>> {
        let interval = validate_interval(interval)?;
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> {range}
  |> filter(fn: (r) => r._measurement == "Power")
  |> filter(fn: (r) => r._field == "value")
  |> aggregateWindow(every: {interval}, fn: mean, createEmpty: false)
  |> map(fn: (r) => ({{ r with _value: r._value / 1000.0 }}))
  |> group(columns: ["_start", "_stop", "_field", "_measurement"])
  |> integral(unit: 1h)"#,
            bucket = self.bucket,
            range = Self::range_clause(start, stop),
            interval = interval,
        );
        self.run_query(flux).await
    }

    async fn daily_energy(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> GridPulseResult<Vec<DataPoint>> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> {range}
  |> filter(fn: (r) => r._measurement == "Power")
  |> filter(fn: (r) => r._field == "value")
  |> map(fn: (r) => ({{ r with _value: r._value / 1000.0 }}))
  |> aggregateWindow(every: 1d, fn: (tables=<-, column) => tables |> integral(unit: 1h), createEmpty: false)"#,
            bucket = self.bucket,
            range = Self::range_clause(start, stop),
        );
        self.run_query(flux).await
    }
}

/// Reduce an annotated-CSV Flux result to `(value, timestamp)` pairs.
///
/// Annotation lines start with `#`; each table re-emits its header, so the
/// `_time` / `_value` column positions are re-resolved whenever a header
/// row appears. Rows without a finite value are dropped.
fn parse_annotated_csv(body: &str) -> Vec<DataPoint> {
    let mut points = Vec::new();
    let mut time_idx: Option<usize> = None;
    let mut value_idx: Option<usize> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let cells: Vec<&str> = line.split(',').collect();

        if cells.iter().any(|c| *c == "_value") {
            time_idx = cells.iter().position(|c| *c == "_time");
            value_idx = cells.iter().position(|c| *c == "_value");
            continue;
        }

        let (Some(ti), Some(vi)) = (time_idx, value_idx) else {
            continue;
        };
        let (Some(raw_time), Some(raw_value)) = (cells.get(ti), cells.get(vi)) else {
            continue;
        };

        let Ok(timestamp) = DateTime::parse_from_rfc3339(raw_time) else {
            continue;
        };
        let Ok(value) = raw_value.parse::<f64>() else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }

        points.push(DataPoint {
            value,
            timestamp: timestamp.with_timezone(&Utc),
        });
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(url: &str) -> InfluxConfig {
        InfluxConfig {
            url: url.to_string(),
            token: "secret-token".to_string(),
            org: "home".to_string(),
            bucket: "power".to_string(),
        }
    }

    const SAMPLE_CSV: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string\r\n\
#group,false,false,true,true,false,false,true,true\r\n\
#default,_result,,,,,,,\r\n\
,result,table,_start,_stop,_time,_value,_field,_measurement\r\n\
,_result,0,2024-03-01T00:00:00Z,2024-03-01T12:00:00Z,2024-03-01T10:00:00Z,412.5,value,Power\r\n\
,_result,0,2024-03-01T00:00:00Z,2024-03-01T12:00:00Z,2024-03-01T11:00:00Z,398,value,Power\r\n\
\r\n";

    #[test]
    fn parses_annotated_csv() {
        let points = parse_annotated_csv(SAMPLE_CSV);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 412.5);
        assert_eq!(
            points[0].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(points[1].value, 398.0);
    }

    #[test]
    fn parse_skips_malformed_rows() {
        let body = "\
,result,table,_start,_stop,_time,_value,_field,_measurement\n\
,_result,0,x,y,not-a-time,1.0,value,Power\n\
,_result,0,x,y,2024-03-01T10:00:00Z,not-a-number,value,Power\n\
,_result,0,x,y,2024-03-01T10:00:00Z,7.5,value,Power\n";
        let points = parse_annotated_csv(body);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 7.5);
    }

    #[test]
    fn parse_handles_empty_result() {
        assert!(parse_annotated_csv("").is_empty());
        assert!(parse_annotated_csv("\r\n").is_empty());
    }

    #[tokio::test]
    async fn write_sends_line_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/write"))
            .and(query_param("org", "home"))
            .and(query_param("bucket", "power"))
            .and(query_param("precision", "ms"))
            .and(header("Authorization", "Token secret-token"))
            .and(body_string_contains("Power value=42.5 1709294400000"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = InfluxStore::new(&test_config(&server.uri())).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        store.write_power(42.5, ts).await.unwrap();
    }

    #[tokio::test]
    async fn write_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/write"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = InfluxStore::new(&test_config(&server.uri())).unwrap();
        let result = store.write_power(1.0, Utc::now()).await;
        assert!(matches!(result, Err(GridPulseError::Store { .. })));
    }

    #[tokio::test]
    async fn power_history_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/query"))
            .and(query_param("org", "home"))
            .and(body_string_contains("aggregateWindow(every: 5m, fn: max"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_CSV))
            .expect(1)
            .mount(&server)
            .await;

        let store = InfluxStore::new(&test_config(&server.uri())).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let stop = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let points = store
            .power_history(start, stop, "5m", Aggregation::Max)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
    }

    #[tokio::test]
    async fn bad_interval_is_rejected_before_any_request() {
        let server = MockServer::start().await;
        let store = InfluxStore::new(&test_config(&server.uri())).unwrap();
        let result = store
            .power_history(Utc::now(), Utc::now(), "5m)", Aggregation::Max)
            .await;
        assert!(matches!(result, Err(GridPulseError::Query { .. })));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
