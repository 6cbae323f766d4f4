//! Push-channel connector for a single topic.
//!
//! Owns the topic's connection state machine:
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> CONNECTED -> RECONNECTING -> CONNECTING ...
//!                                                 |
//!                                                 +-> FALLBACK (until reset)
//! ```
//!
//! Every transition and every recognised message is forwarded to the single
//! consumer loop as a `ConnectorEvent`.

use crate::backoff::{BackoffConfig, ReconnectDecision, ReconnectPolicy};
use crate::error::{WsError, WsResult};
use crate::heartbeat::Heartbeat;
use crate::message::{PushMessage, SubscribeRequest};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use markfeed_core::{ConnectionState, ConnectionStateCell, ConnectionStateReader, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket URL.
    pub url: String,
    pub backoff: BackoffConfig,
    /// Ping after this much inbound silence.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            backoff: BackoffConfig::default(),
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
        }
    }
}

/// Event emitted by a connector.
#[derive(Debug, Clone)]
pub struct ConnectorEvent {
    pub topic: Topic,
    pub kind: ConnectorEventKind,
}

#[derive(Debug, Clone)]
pub enum ConnectorEventKind {
    /// A recognised push payload.
    Message {
        message: PushMessage,
        received_at: DateTime<Utc>,
    },
    StateChanged(ConnectionState),
    /// The socket went away; `reason` is a short metric label.
    Dropped { reason: &'static str },
    /// A frame that was not valid JSON. Dropped.
    Malformed,
}

#[derive(Debug, Default)]
struct Control {
    force_reconnect: Notify,
    reset: Notify,
    shutdown: CancellationToken,
}

/// Cloneable handle to a running connector.
#[derive(Debug, Clone)]
pub struct FeedConnectorHandle {
    topic: Topic,
    state: ConnectionStateReader,
    control: Arc<Control>,
}

impl FeedConnectorHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn state_reader(&self) -> ConnectionStateReader {
        self.state.clone()
    }

    /// Drop a live socket and go through RECONNECTING.
    ///
    /// Only acts while CONNECTED; returns whether the request was delivered.
    pub fn force_reconnect(&self) -> bool {
        if self.state.get() != ConnectionState::Connected {
            return false;
        }
        self.control.force_reconnect.notify_one();
        true
    }

    /// Leave FALLBACK and restart the connect cycle with a fresh retry budget.
    pub fn reset(&self) -> bool {
        if self.state.get() != ConnectionState::Fallback {
            return false;
        }
        self.control.reset.notify_one();
        true
    }

    /// Close the socket and stop the connector. Idempotent.
    pub fn shutdown(&self) {
        if !self.control.shutdown.is_cancelled() {
            info!(topic = %self.topic, "Feed connector shutdown requested");
            self.control.shutdown.cancel();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.control.shutdown.is_cancelled()
    }
}

/// Push connector for one topic.
pub struct FeedConnector {
    config: FeedConfig,
    topic: Topic,
    state: ConnectionStateCell,
    heartbeat: Heartbeat,
    event_tx: mpsc::Sender<ConnectorEvent>,
    control: Arc<Control>,
}

impl FeedConnector {
    /// Create a connector. `shutdown` is usually a child of the session token.
    pub fn new(
        config: FeedConfig,
        topic: Topic,
        event_tx: mpsc::Sender<ConnectorEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let heartbeat = Heartbeat::new(
            Duration::from_millis(config.heartbeat_interval_ms),
            Duration::from_millis(config.heartbeat_timeout_ms),
        );
        Self {
            config,
            topic,
            state: ConnectionStateCell::new(),
            heartbeat,
            event_tx,
            control: Arc::new(Control {
                shutdown,
                ..Control::default()
            }),
        }
    }

    pub fn handle(&self) -> FeedConnectorHandle {
        FeedConnectorHandle {
            topic: self.topic.clone(),
            state: self.state.reader(),
            control: self.control.clone(),
        }
    }

    /// Spawn the connector on the runtime and return its handle.
    pub fn spawn(self) -> (FeedConnectorHandle, tokio::task::JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Run until shutdown. Never returns an error: exhausting retries parks
    /// the connector in FALLBACK.
    pub async fn run(self) {
        let mut policy = ReconnectPolicy::new(self.config.backoff);
        self.set_state(ConnectionState::Connecting).await;

        loop {
            if self.is_shutdown() {
                break;
            }

            match self.connect_and_stream(&mut policy).await {
                Ok(()) => debug!(topic = %self.topic, "Push connection closed"),
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "Push connection error");
                    self.emit(ConnectorEventKind::Dropped { reason: e.reason() })
                        .await;
                }
            }

            if self.is_shutdown() {
                break;
            }

            self.set_state(ConnectionState::Reconnecting).await;

            match policy.on_failure() {
                ReconnectDecision::Retry { attempt, delay } => {
                    warn!(
                        topic = %self.topic,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.control.shutdown.cancelled() => break,
                    }
                    self.set_state(ConnectionState::Connecting).await;
                }
                ReconnectDecision::Fallback => {
                    error!(
                        topic = %self.topic,
                        attempts = policy.attempt(),
                        "Reconnect budget exhausted, handing topic to fallback"
                    );
                    self.set_state(ConnectionState::Fallback).await;
                    tokio::select! {
                        () = self.control.reset.notified() => {
                            info!(topic = %self.topic, "Fallback reset, reconnecting");
                            policy.reset();
                            self.set_state(ConnectionState::Connecting).await;
                        }
                        () = self.control.shutdown.cancelled() => break,
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        info!(topic = %self.topic, "Feed connector stopped");
    }

    fn is_shutdown(&self) -> bool {
        self.control.shutdown.is_cancelled()
    }

    async fn set_state(&self, state: ConnectionState) {
        let previous = self.state.set(state);
        if previous != state {
            debug!(topic = %self.topic, from = %previous, to = %state, "Connection state change");
            self.emit(ConnectorEventKind::StateChanged(state)).await;
        }
    }

    async fn emit(&self, kind: ConnectorEventKind) {
        let event = ConnectorEvent {
            topic: self.topic.clone(),
            kind,
        };
        if self.event_tx.send(event).await.is_err() {
            debug!(topic = %self.topic, "Connector event receiver dropped");
        }
    }

    async fn connect_and_stream(&self, policy: &mut ReconnectPolicy) -> WsResult<()> {
        info!(topic = %self.topic, url = %self.config.url, "Connecting push channel");

        let connect = connect_async_tls_with_config(self.config.url.as_str(), None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result.map_err(|e| WsError::ConnectionFailed(e.to_string()))?,
            () = self.control.shutdown.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        let subscribe = SubscribeRequest::for_topic(&self.topic).to_text()?;
        write
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;

        policy.reset();
        self.heartbeat.reset();
        self.set_state(ConnectionState::Connected).await;
        info!(topic = %self.topic, "Push channel connected");

        let check_period = self.heartbeat.check_period();

        loop {
            tokio::select! {
                biased;

                () = self.control.shutdown.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                () = self.control.force_reconnect.notified() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Failed to send Close frame before forced reconnect");
                    }
                    return Err(WsError::ForcedReconnect("topic silent".to_string()));
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_inbound();
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_inbound();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {
                            self.heartbeat.record_inbound();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            });
                        }
                    }
                }

                () = tokio::time::sleep(check_period) => {
                    if self.heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_ping() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!(topic = %self.topic, "Sent heartbeat ping");
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        match PushMessage::parse(text) {
            Ok(PushMessage::Ignored(kind)) => {
                debug!(topic = %self.topic, ?kind, "Ignoring push message");
            }
            Ok(message) => {
                self.emit(ConnectorEventKind::Message {
                    message,
                    received_at: Utc::now(),
                })
                .await;
            }
            Err(e) => {
                debug!(topic = %self.topic, error = %e, "Dropping malformed push frame");
                self.emit(ConnectorEventKind::Malformed).await;
            }
        }
    }
}
