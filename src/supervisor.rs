// src/supervisor.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{GridPulseError, GridPulseResult};
use crate::feed::{FeedConnector, FeedEvent, FeedEventKind, FeedSession, RawSample};
use crate::store::SampleStore;
use crate::types::{Epoch, SupervisorConfig, SupervisorState, SupervisorStatus};

/// Commands that can be sent to the connection supervisor
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Tear down the current session (if any) and establish a new one
    Reconnect,
    /// Get a snapshot of supervisor state
    GetStatus {
        response: oneshot::Sender<SupervisorStatus>,
    },
    /// Tear everything down and stop; no further reconnects are scheduled
    Shutdown,
}

/// Compute the backoff delay for a reconnect attempt (1-based).
///
/// delay(n) = min(floor * 1.5^(n-1), cap)
pub fn reconnect_delay(config: &SupervisorConfig, attempt: u32) -> Duration {
    let floor = config.reconnect_floor.as_millis() as f64;
    let cap = config.reconnect_cap.as_millis() as f64;
    let delay = floor * 1.5f64.powi(attempt.saturating_sub(1) as i32);
    Duration::from_millis(delay.min(cap) as u64)
}

/// The connection supervisor.
///
/// Owns at most one logical feed session at a time and drives the
/// connect / reconnect / health-check state machine:
///
/// ```text
///   Idle ──connect()──▶ Connecting ──connected──▶ Live
///                           │  ▲                    │
///               disconnect/ │  │ delay elapsed      │ disconnected /
///               ctor error  ▼  │                    ▼ stale data
///                        ReconnectWait ◀────────────┘
///                           │
///             attempts > M  ▼
///                        Backoff ──cooldown──▶ Connecting
/// ```
///
/// All transitions run on the supervisor's own task: commands, feed events
/// and timer expiries are multiplexed through one `select!` loop, so no
/// locking is needed and every handler runs to completion before the next
/// event is processed. Each session is stamped with a monotonically
/// increasing epoch; events from superseded epochs are dropped on arrival.
pub struct Supervisor {
    config: SupervisorConfig,
    connector: Arc<dyn FeedConnector>,
    store: Arc<dyn SampleStore>,
    command_tx: mpsc::UnboundedSender<SupervisorCommand>,
    command_rx: Option<mpsc::UnboundedReceiver<SupervisorCommand>>,
    events_tx: mpsc::UnboundedSender<FeedEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<FeedEvent>>,

    state: SupervisorState,
    current_epoch: Epoch,
    session: Option<Box<dyn FeedSession>>,
    is_connected: bool,
    reconnect_attempts: u32,
    last_data: Option<Instant>,
    samples_forwarded: u64,

    // Timers are explicit deadlines, cleared deterministically on every
    // state exit. Epoch filtering still guards against a timer that
    // already fired racing a cancellation.
    reconnect_at: Option<Instant>,
    health_at: Option<Instant>,
}

impl Supervisor {
    /// Create a new supervisor. The feed connector and sample store are
    /// injected; the supervisor holds no global state.
    pub fn new(
        config: SupervisorConfig,
        connector: Arc<dyn FeedConnector>,
        store: Arc<dyn SampleStore>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            connector,
            store,
            command_tx,
            command_rx: Some(command_rx),
            events_tx,
            events_rx: Some(events_rx),
            state: SupervisorState::Idle,
            current_epoch: 0,
            session: None,
            is_connected: false,
            reconnect_attempts: 0,
            last_data: None,
            samples_forwarded: 0,
            reconnect_at: None,
            health_at: None,
        }
    }

    /// Get a handle to send commands to the supervisor
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Run the supervisor (consumes self). Establishes the first session
    /// immediately and then loops until shutdown.
    pub async fn start(mut self) -> GridPulseResult<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| GridPulseError::supervisor_not_running("Supervisor already started"))?;
        let mut events_rx = self
            .events_rx
            .take()
            .ok_or_else(|| GridPulseError::supervisor_not_running("Supervisor already started"))?;

        info!("Connection supervisor starting");
        self.connect().await;

        loop {
            let reconnect_deadline = self.reconnect_at.unwrap_or_else(far_future);
            let health_deadline = self.health_at.unwrap_or_else(far_future);

            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(SupervisorCommand::Shutdown) => {
                            info!("Shutdown command received");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            info!("Command channel closed, shutting down supervisor");
                            break;
                        }
                    }
                }

                event = events_rx.recv() => {
                    match event {
                        // The supervisor holds its own sender, so the
                        // channel cannot close while we are running.
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }

                _ = sleep_until(reconnect_deadline), if self.reconnect_at.is_some() => {
                    self.on_reconnect_due().await;
                }

                _ = sleep_until(health_deadline), if self.health_at.is_some() => {
                    self.on_health_check().await;
                }
            }
        }

        // Terminal teardown: no grace wait, nothing new is coming.
        self.teardown(false).await;
        self.state = SupervisorState::Idle;
        info!("Connection supervisor stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Reconnect => {
                info!("Reconnect requested");
                self.connect().await;
            }
            SupervisorCommand::GetStatus { response } => {
                let _ = response.send(self.status()); // Ignore send errors
            }
            SupervisorCommand::Shutdown => unreachable!("handled in the select loop"),
        }
    }

    /// Establish a new session, tearing down any existing one first so that
    /// two epochs are never concurrently current.
    async fn connect(&mut self) {
        self.teardown(true).await;

        self.state = SupervisorState::Connecting;
        self.current_epoch += 1;
        let epoch = self.current_epoch;
        info!(epoch, "Connecting to feed");

        match self.connector.connect(epoch, self.events_tx.clone()).await {
            Ok(session) => {
                self.session = Some(session);
            }
            Err(e) => {
                // A constructor failure is an immediate disconnect. Auth
                // rejections retry on the same schedule but are logged
                // loudly so a bad token is not mistaken for an outage.
                if e.is_auth() {
                    error!(epoch, "Feed authentication failed: {}", e);
                } else {
                    warn!(epoch, "Failed to establish feed session: {}", e);
                }
                self.schedule_reconnect();
            }
        }
    }

    /// Tear down the current epoch: cancel timers, invalidate the epoch,
    /// close the session, then optionally wait for the upstream to release
    /// the old subscription before a new one is opened.
    async fn teardown(&mut self, grace: bool) {
        self.reconnect_at = None;
        self.health_at = None;
        self.is_connected = false;

        if let Some(mut session) = self.session.take() {
            // Invalidate before closing: events the old session still has
            // in flight must compare unequal from this point on.
            self.current_epoch += 1;
            session.close().await;

            if grace && !self.config.teardown_grace.is_zero() {
                sleep(self.config.teardown_grace).await;
            }
        }
    }

    fn handle_event(&mut self, event: FeedEvent) {
        if event.epoch != self.current_epoch {
            debug!(
                event_epoch = event.epoch,
                current_epoch = self.current_epoch,
                "Ignoring event from superseded session"
            );
            return;
        }

        match event.kind {
            FeedEventKind::Connected => {
                info!(epoch = event.epoch, "Feed connected");
                self.state = SupervisorState::Live;
                self.is_connected = true;
                self.reconnect_attempts = 0;
                self.last_data = Some(Instant::now());
                self.reconnect_at = None;
                self.health_at = Some(Instant::now() + self.config.health_check_interval);
            }
            FeedEventKind::Disconnected(reason) => {
                warn!(
                    epoch = event.epoch,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "Feed disconnected"
                );
                self.is_connected = false;
                self.health_at = None;
                self.schedule_reconnect();
            }
            FeedEventKind::Error(message) => {
                // Logged only. A broken session follows up with a
                // disconnect, or the health check catches the silence.
                error!(epoch = event.epoch, "Feed error: {}", message);
            }
            FeedEventKind::Data(sample) => {
                self.forward_sample(sample);
            }
        }
    }

    /// Validate and forward a sample to the store.
    ///
    /// The write runs off the supervisor task and failures are logged and
    /// swallowed: the streaming session and the persistence path fail
    /// independently.
    fn forward_sample(&mut self, sample: RawSample) {
        let Some(power) = sample.power else {
            warn!("Discarding sample without a numeric power value");
            return;
        };

        self.last_data = Some(Instant::now());
        self.samples_forwarded += 1;
        debug!(power, "Sample accepted");

        let store = Arc::clone(&self.store);
        let timestamp = sample.timestamp.unwrap_or_else(Utc::now);
        tokio::spawn(async move {
            if let Err(e) = store.write_power(power, timestamp).await {
                warn!("Store write failed, sample dropped: {}", e);
            }
        });
    }

    fn schedule_reconnect(&mut self) {
        // Don't schedule if already scheduled
        if self.reconnect_at.is_some() {
            return;
        }
        self.health_at = None;
        self.is_connected = false;

        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            error!(
                max_attempts = self.config.max_reconnect_attempts,
                cooldown_s = self.config.retry_cooldown.as_secs(),
                "Max reconnect attempts reached, entering cooldown"
            );
            self.state = SupervisorState::Backoff;
            self.reconnect_at = Some(Instant::now() + self.config.retry_cooldown);
            return;
        }

        self.reconnect_attempts += 1;
        let delay = reconnect_delay(&self.config, self.reconnect_attempts);
        self.state = SupervisorState::ReconnectWait;
        info!(
            attempt = self.reconnect_attempts,
            max_attempts = self.config.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if self.state == SupervisorState::Backoff {
            info!("Cooldown elapsed, resetting reconnect counters");
            self.reconnect_attempts = 0;
        }
        self.connect().await;
    }

    /// Detect a session that reports healthy but has silently stopped
    /// delivering data, and force the full reconnect path.
    async fn on_health_check(&mut self) {
        if self.state != SupervisorState::Live {
            self.health_at = None;
            return;
        }

        let silence = self
            .last_data
            .map(|t| t.elapsed())
            .unwrap_or(self.config.staleness_threshold + Duration::from_secs(1));

        if silence > self.config.staleness_threshold {
            warn!(
                silent_for_s = silence.as_secs(),
                "No data received, forcing reconnect"
            );
            self.connect().await;
        } else {
            self.health_at = Some(Instant::now() + self.config.health_check_interval);
        }
    }

    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.state,
            is_connected: self.is_connected,
            current_epoch: self.current_epoch,
            reconnect_attempts: self.reconnect_attempts,
            last_data_age_ms: self.last_data.map(|t| t.elapsed().as_millis() as u64),
            samples_forwarded: self.samples_forwarded,
        }
    }
}

/// A deadline that never fires within the life of the process; used to park
/// disarmed select arms.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365)
}

/// Handle for interacting with a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    command_tx: mpsc::UnboundedSender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Force a full teardown-and-reconnect of the current session
    pub async fn force_reconnect(&self) -> GridPulseResult<()> {
        self.command_tx.send(SupervisorCommand::Reconnect)?;
        Ok(())
    }

    /// Get a snapshot of supervisor state
    pub async fn status(&self) -> GridPulseResult<SupervisorStatus> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx.send(SupervisorCommand::GetStatus {
            response: response_tx,
        })?;
        Ok(response_rx.await?)
    }

    /// Shut the supervisor down; no further reconnects will be scheduled
    pub async fn shutdown(&self) -> GridPulseResult<()> {
        self.command_tx.send(SupervisorCommand::Shutdown)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delays_follow_the_schedule() {
        let config = SupervisorConfig::default();
        let expected_ms: [u64; 10] = [
            5000, 7500, 11250, 16875, 25312, 37968, 56953, 60000, 60000, 60000,
        ];
        for (i, expected) in expected_ms.iter().enumerate() {
            let delay = reconnect_delay(&config, (i + 1) as u32);
            assert_eq!(
                delay.as_millis() as u64,
                *expected,
                "attempt {} delay mismatch",
                i + 1
            );
        }
    }

    #[test]
    fn backoff_is_monotonic_until_the_cap() {
        let config = SupervisorConfig::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = reconnect_delay(&config, attempt);
            assert!(delay >= previous);
            assert!(delay <= config.reconnect_cap);
            previous = delay;
        }
    }

    #[test]
    fn backoff_respects_custom_floor_and_cap() {
        let config = SupervisorConfig::builder()
            .reconnect_floor(Duration::from_millis(100))
            .reconnect_cap(Duration::from_millis(250))
            .build();
        assert_eq!(reconnect_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(reconnect_delay(&config, 2), Duration::from_millis(150));
        assert_eq!(reconnect_delay(&config, 3), Duration::from_millis(225));
        assert_eq!(reconnect_delay(&config, 4), Duration::from_millis(250));
        assert_eq!(reconnect_delay(&config, 20), Duration::from_millis(250));
    }
}
