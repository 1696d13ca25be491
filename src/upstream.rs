// src/upstream.rs

//! Production feed connector: a graphql-transport-ws subscription over
//! `tokio-tungstenite`.
//!
//! One [`WsFeedConnector::connect`] call performs the websocket handshake,
//! `connection_init` / `connection_ack` exchange and subscription setup,
//! then hands the socket to a reader task that forwards everything as
//! epoch-tagged [`FeedEvent`]s. Handshake failures surface as constructor
//! errors, which the supervisor treats as an immediate disconnect.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::error::{GridPulseError, GridPulseResult};
use crate::feed::{FeedConnector, FeedEvent, FeedEventKind, FeedEventSender, FeedSession, RawSample};
use crate::types::Epoch;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIPTION_ID: &str = "1";

/// Connects to the upstream provider's live-measurement subscription
pub struct WsFeedConnector {
    config: FeedConfig,
}

impl WsFeedConnector {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    fn subscription_query(&self) -> String {
        format!(
            "subscription {{ liveMeasurement(homeId: \"{}\") {{ power timestamp }} }}",
            self.config.home_id
        )
    }

    /// Websocket handshake plus the graphql-transport-ws init exchange.
    async fn open_socket(&self) -> GridPulseResult<WsStream> {
        let mut request = self
            .config
            .subscription_url
            .as_str()
            .into_client_request()
            .map_err(|e| GridPulseError::feed(format!("bad subscription url: {}", e)))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("graphql-transport-ws"),
        );

        let handshake_timeout = Duration::from_secs(self.config.request_timeout_secs);
        let (mut ws, _response) = timeout(handshake_timeout, connect_async(request))
            .await
            .map_err(|_| GridPulseError::feed("websocket handshake timed out"))?
            .map_err(|e| GridPulseError::feed(format!("websocket handshake failed: {}", e)))?;

        let init = json!({
            "type": "connection_init",
            "payload": { "token": self.config.api_token },
        });
        ws.send(Message::Text(init.to_string()))
            .await
            .map_err(|e| GridPulseError::feed(format!("failed to send connection_init: {}", e)))?;

        timeout(handshake_timeout, wait_for_ack(&mut ws))
            .await
            .map_err(|_| GridPulseError::feed("connection_ack timed out"))??;

        Ok(ws)
    }
}

/// Drain messages until the server acknowledges the connection
async fn wait_for_ack(ws: &mut WsStream) -> GridPulseResult<()> {
    while let Some(message) = ws.next().await {
        let message =
            message.map_err(|e| GridPulseError::feed(format!("socket error during init: {}", e)))?;
        match message {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text)?;
                match value.get("type").and_then(Value::as_str) {
                    Some("connection_ack") => return Ok(()),
                    Some("connection_error") | Some("error") => {
                        return Err(classify_init_error(&value.to_string()));
                    }
                    // ka / ping during init are fine
                    _ => continue,
                }
            }
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed during init".to_string());
                return Err(classify_init_error(&reason));
            }
            _ => continue,
        }
    }
    Err(GridPulseError::feed("socket ended before connection_ack"))
}

/// Distinguish a rejected token from a transient failure so the log makes
/// the difference visible; the retry schedule is the same either way.
fn classify_init_error(detail: &str) -> GridPulseError {
    let lowered = detail.to_lowercase();
    if lowered.contains("auth") || lowered.contains("unauthorized") || lowered.contains("forbidden")
    {
        GridPulseError::feed_auth(detail.to_string())
    } else {
        GridPulseError::feed(detail.to_string())
    }
}

#[async_trait]
impl FeedConnector for WsFeedConnector {
    async fn connect(
        &self,
        epoch: Epoch,
        events: FeedEventSender,
    ) -> GridPulseResult<Box<dyn FeedSession>> {
        let mut ws = self.open_socket().await?;

        let subscribe = json!({
            "id": SUBSCRIPTION_ID,
            "type": "subscribe",
            "payload": { "query": self.subscription_query() },
        });
        ws.send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| GridPulseError::feed(format!("failed to subscribe: {}", e)))?;

        let _ = events.send(FeedEvent::new(epoch, FeedEventKind::Connected));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(ws, epoch, events, shutdown_rx));

        Ok(Box::new(WsFeedSession {
            shutdown: Some(shutdown_tx),
            task,
        }))
    }
}

/// Reader task: forwards server messages as feed events until the socket
/// ends or the session is closed.
async fn run_session(
    mut ws: WsStream,
    epoch: Epoch,
    events: FeedEventSender,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                let _ = ws.close(None).await;
                break;
            }

            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_server_message(&text, epoch, &mut ws).await {
                        let terminal = matches!(event.kind, FeedEventKind::Disconnected(_));
                        let _ = events.send(event);
                        if terminal {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    let _ = events.send(FeedEvent::new(epoch, FeedEventKind::Disconnected(reason)));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(FeedEvent::new(
                        epoch,
                        FeedEventKind::Disconnected(Some(e.to_string())),
                    ));
                    break;
                }
                None => {
                    let _ = events.send(FeedEvent::new(epoch, FeedEventKind::Disconnected(None)));
                    break;
                }
            }
        }
    }
    debug!(epoch, "Feed session reader finished");
}

/// Map one graphql-transport-ws server message to a feed event, if any
async fn decode_server_message(text: &str, epoch: Epoch, ws: &mut WsStream) -> Option<FeedEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Undecodable feed message: {}", e);
            return None;
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some("next") => {
            let measurement = value
                .pointer("/payload/data/liveMeasurement")
                .unwrap_or(&Value::Null);
            Some(FeedEvent::new(
                epoch,
                FeedEventKind::Data(RawSample::from_json(measurement)),
            ))
        }
        Some("error") => Some(FeedEvent::new(
            epoch,
            FeedEventKind::Error(
                value
                    .get("payload")
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unknown subscription error".to_string()),
            ),
        )),
        Some("complete") => Some(FeedEvent::new(
            epoch,
            FeedEventKind::Disconnected(Some("subscription complete".to_string())),
        )),
        Some("ping") => {
            let _ = ws.send(Message::Text(json!({ "type": "pong" }).to_string())).await;
            None
        }
        // connection_ack duplicates, ka, pong
        _ => None,
    }
}

/// Session handle owning the reader task
struct WsFeedSession {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

#[async_trait]
impl FeedSession for WsFeedSession {
    async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        // Give the reader a moment to send the close frame, then drop it.
        if timeout(Duration::from_millis(500), &mut self.task).await.is_err() {
            self.task.abort();
        }
    }
}
