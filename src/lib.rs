//! # GridPulse - Supervised Power-Feed Ingestion
//!
//! GridPulse ingests a real-time power-metering feed over a persistent
//! streaming subscription, persists samples to a time-series store, and
//! serves aggregated views (instant power, power history, energy integrals,
//! daily rollups) over HTTP.
//!
//! ## 🎯 Core Philosophy
//!
//! The interesting part of this system is not the happy path but what
//! happens when the upstream feed misbehaves:
//! - **Bounded staleness**: reconnection with capped exponential backoff and
//!   a long cooldown once the attempt budget is exhausted
//! - **Silent-stall detection**: a health check that notices a session which
//!   reports connected but has stopped delivering data
//! - **Epoch filtering**: every session is stamped with a monotonically
//!   increasing epoch; in-flight events from a superseded session can never
//!   poison state or reach the store
//!
//! ## 📊 Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────┐
//!                        │     Connection Supervisor    │
//!   upstream provider ──▶│                              │
//!    (streaming feed)    │ • connect / reconnect state  │
//!                        │ • backoff + cooldown policy  │
//!                        │ • health check (staleness)   │
//!                        │ • epoch filtering            │
//!                        └───────┬──────────────────────┘
//!                                │ validated samples
//!                        ┌───────▼──────────┐   ┌──────────────────┐
//!                        │   Sample Store   │◀──│  Query Service   │
//!                        │  (InfluxDB 2.x)  │   │   (HTTP API)     │
//!                        └──────────────────┘   └────────┬─────────┘
//!                                                        │
//!                                                    dashboard
//! ```
//!
//! The supervisor owns at most one logical feed session at a time. All of
//! its state transitions run on a single task driven by one `select!` loop
//! (commands, feed events, timer expiries), so handlers run to completion
//! and no locking is needed. The feed connector and the sample store are
//! injected trait objects, so tests drive the full state machine with mocks
//! and a paused clock.
//!
//! ## 🚀 Usage
//!
//! ```rust,no_run
//! use gridpulse::{
//!     FeedConnector, FeedEventSender, FeedSession, GridPulseResult,
//!     Supervisor, SupervisorConfig,
//! };
//! use std::sync::Arc;
//!
//! # struct MyConnector;
//! # #[async_trait::async_trait]
//! # impl FeedConnector for MyConnector {
//! #     async fn connect(
//! #         &self,
//! #         _epoch: u64,
//! #         _events: FeedEventSender,
//! #     ) -> GridPulseResult<Box<dyn FeedSession>> {
//! #         unimplemented!()
//! #     }
//! # }
//! # struct MyStore;
//! # #[async_trait::async_trait]
//! # impl gridpulse::SampleStore for MyStore {
//! #     async fn write_power(&self, _p: f64, _t: chrono::DateTime<chrono::Utc>) -> GridPulseResult<()> { Ok(()) }
//! #     async fn current_power(&self) -> GridPulseResult<Option<gridpulse::DataPoint>> { Ok(None) }
//! #     async fn power_history(&self, _s: chrono::DateTime<chrono::Utc>, _e: chrono::DateTime<chrono::Utc>, _i: &str, _a: gridpulse::Aggregation) -> GridPulseResult<Vec<gridpulse::DataPoint>> { Ok(vec![]) }
//! #     async fn energy_history(&self, _s: chrono::DateTime<chrono::Utc>, _e: chrono::DateTime<chrono::Utc>, _i: &str) -> GridPulseResult<Vec<gridpulse::DataPoint>> { Ok(vec![]) }
//! #     async fn daily_energy(&self, _s: chrono::DateTime<chrono::Utc>, _e: chrono::DateTime<chrono::Utc>) -> GridPulseResult<Vec<gridpulse::DataPoint>> { Ok(vec![]) }
//! # }
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = Supervisor::new(
//!         SupervisorConfig::default(),
//!         Arc::new(MyConnector),
//!         Arc::new(MyStore),
//!     );
//!     let handle = supervisor.handle();
//!
//!     // Runs until shutdown, reconnecting as needed
//!     tokio::spawn(async move {
//!         supervisor.start().await.unwrap();
//!     });
//!
//!     let status = handle.status().await.unwrap();
//!     println!("feed state: {:?}", status.state);
//! }
//! ```
//!
//! ## Features
//!
//! - **Self-healing**: transient upstream failures, network errors and
//!   silent stalls all recover without operator action
//! - **Independent failure domains**: a store outage drops samples but never
//!   touches the streaming session, and vice versa
//! - **Observability**: structured tracing on every transition, plus a
//!   status snapshot over the health endpoint
//! - **Async**: fully async/await, single supervision task, no locks

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod influx;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod upstream;

// Re-export common types for convenience
pub use types::{
    Aggregation, DataPoint, Epoch, SupervisorConfig, SupervisorConfigBuilder, SupervisorState,
    SupervisorStatus,
};

pub use error::{GridPulseError, GridPulseResult};

pub use feed::{
    FeedConnector, FeedEvent, FeedEventKind, FeedEventSender, FeedSession, RawSample,
};

pub use supervisor::{reconnect_delay, Supervisor, SupervisorCommand, SupervisorHandle};

pub use store::SampleStore;

pub use config::{AppConfig, FeedConfig, HttpConfig, InfluxConfig};

pub use influx::InfluxStore;

pub use upstream::WsFeedConnector;

pub use api::{router, AppState};
