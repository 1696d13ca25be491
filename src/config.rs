// src/config.rs

//! Startup configuration.
//!
//! Loaded once at process start and immutable thereafter: an optional TOML
//! file layered under environment variables (`GRIDPULSE_` prefix, `__`
//! section separator, e.g. `GRIDPULSE_FEED__API_TOKEN`).

use serde::Deserialize;

use crate::error::{GridPulseError, GridPulseResult};

/// Upstream feed credentials and endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// API token presented during the websocket handshake
    pub api_token: String,
    /// graphql-transport-ws subscription endpoint
    #[serde(default = "default_subscription_url")]
    pub subscription_url: String,
    /// Identifier of the metered home/device to subscribe to
    pub home_id: String,
    /// Handshake timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Time-series store connection
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    #[serde(default = "default_influx_url")]
    pub url: String,
    pub token: String,
    #[serde(default = "default_influx_org")]
    pub org: String,
    #[serde(default = "default_influx_bucket")]
    pub bucket: String,
}

/// HTTP API listener
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

/// Full application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub influx: InfluxConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file plus the environment.
    /// Environment variables win over the file.
    pub fn load(path: &str) -> GridPulseResult<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("GRIDPULSE").separator("__"))
            .build()
            .map_err(|e| GridPulseError::config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| GridPulseError::config(e.to_string()))
    }
}

fn default_subscription_url() -> String {
    "wss://api.example.com/v1/feed".to_string()
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_influx_org() -> String {
    "home".to_string()
}

fn default_influx_bucket() -> String {
    "power".to_string()
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_fills_defaults() {
        let toml = r#"
            [feed]
            api_token = "tok"
            home_id = "home-1"

            [influx]
            token = "influx-tok"
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.feed.api_token, "tok");
        assert_eq!(cfg.feed.request_timeout_secs, 5);
        assert_eq!(cfg.influx.url, "http://localhost:8086");
        assert_eq!(cfg.influx.org, "home");
        assert_eq!(cfg.influx.bucket, "power");
        assert_eq!(cfg.http.port, 3000);
        assert_eq!(cfg.http.host, "0.0.0.0");
    }

    #[test]
    fn missing_credentials_is_an_error() {
        let toml = r#"
            [feed]
            home_id = "home-1"
        "#;
        let result: Result<AppConfig, _> = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            [feed]
            api_token = "tok"
            home_id = "home-1"
            subscription_url = "wss://feed.local/graphql"

            [influx]
            token = "influx-tok"
            bucket = "metering"

            [http]
            port = 8080
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.feed.subscription_url, "wss://feed.local/graphql");
        assert_eq!(cfg.influx.bucket, "metering");
        assert_eq!(cfg.http.port, 8080);
    }
}
