//! Push channel: the client side of `GET /ws`.
//!
//! [`PushChannel::spawn`] starts a supervisor task that keeps one
//! authenticated WebSocket open, reconnecting with exponential backoff when
//! it drops. Lifecycle changes and pushed messages are delivered as
//! [`ChannelEvent`]s to the single [`Subscription`].
//!
//! A refused credential ends the supervisor: retrying cannot succeed, so
//! the subscriber gets [`ChannelEvent::Unauthorized`] and the stream ends.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use url::Url;

use quickchat_proto::event::{self, ServerEvent};
use quickchat_proto::message::{Message, UserId};

use crate::config::ReconnectConfig;

/// Type alias for the read half of a WebSocket connection.
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Settings for the push channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL (`ws://host/ws`).
    pub url: Url,
    /// Bearer token sent with the upgrade request.
    pub token: String,
    /// Timeout for each connection attempt.
    pub connect_timeout: Duration,
    /// Capacity of the event queue.
    pub capacity: usize,
    /// Backoff between attempts.
    pub reconnect: ReconnectConfig,
}

/// What the push channel reports to its subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The server accepted the channel for `user_id`.
    Connected {
        /// Who the server says we are.
        user_id: UserId,
    },
    /// The channel dropped; a reconnect is scheduled.
    Disconnected,
    /// A message addressed to us was stored.
    NewMessage(Message),
    /// The server refused our credential; no reconnect will follow.
    Unauthorized,
}

/// Errors from the push channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Another [`Subscription`] is still alive.
    #[error("push channel already has a subscriber")]
    AlreadySubscribed,

    /// The connection attempt timed out.
    #[error("push channel connect timed out")]
    Timeout,

    /// The server refused the credential.
    #[error("push channel not authorized")]
    Unauthorized,

    /// The connection attempt failed.
    #[error("push channel connect failed: {0}")]
    Connect(String),
}

type Slot = Arc<Mutex<Option<mpsc::Receiver<ChannelEvent>>>>;

/// Handle to the reconnecting push channel.
///
/// Dropping it stops the supervisor and closes the socket.
pub struct PushChannel {
    slot: Slot,
    supervisor: tokio::task::JoinHandle<()>,
}

impl PushChannel {
    /// Starts connecting in the background.
    #[must_use]
    pub fn spawn(config: ChannelConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let supervisor = tokio::spawn(supervise(config, tx));
        Self {
            slot: Arc::new(Mutex::new(Some(rx))),
            supervisor,
        }
    }

    /// Takes the event stream.
    ///
    /// There is one stream per channel; dropping the [`Subscription`] hands
    /// it back, and events that arrive meanwhile wait in the queue.
    ///
    /// # Errors
    ///
    /// [`ChannelError::AlreadySubscribed`] while another subscription is
    /// alive.
    pub fn subscribe(&self) -> Result<Subscription, ChannelError> {
        let rx = self.slot.lock().take().ok_or(ChannelError::AlreadySubscribed)?;
        Ok(Subscription {
            rx: Some(rx),
            slot: Arc::clone(&self.slot),
        })
    }

    /// Whether the supervisor has stopped (after `Unauthorized`).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Stops reconnecting and closes the socket.
    pub fn shutdown(&self) {
        self.supervisor.abort();
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

/// Exclusive reader of a [`PushChannel`]'s events.
pub struct Subscription {
    rx: Option<mpsc::Receiver<ChannelEvent>>,
    slot: Slot,
}

impl Subscription {
    /// Next event, or `None` once the channel has stopped for good.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// A subscription fed directly by `rx`, not tied to a [`PushChannel`].
    #[cfg(test)]
    pub(crate) fn detached(rx: mpsc::Receiver<ChannelEvent>) -> Self {
        Self {
            rx: Some(rx),
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            *self.slot.lock() = Some(rx);
        }
    }
}

/// Connect, read until the socket drops, back off, repeat.
async fn supervise(config: ChannelConfig, tx: mpsc::Sender<ChannelEvent>) {
    let mut backoff = config.reconnect.initial_backoff;
    loop {
        match connect(&config).await {
            Ok(ws) => {
                tracing::info!(url = %config.url, "push channel open");
                match read_events(ws, &tx).await {
                    ReadOutcome::SubscriberGone => return,
                    ReadOutcome::Closed { announced } => {
                        if announced {
                            backoff = config.reconnect.initial_backoff;
                            if tx.send(ChannelEvent::Disconnected).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Err(ChannelError::Unauthorized) => {
                tracing::warn!(url = %config.url, "push channel refused credential, giving up");
                let _ = tx.send(ChannelEvent::Unauthorized).await;
                return;
            }
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "push channel connect failed");
            }
        }

        tracing::info!(retry_in_ms = backoff.as_millis(), "push channel reconnecting");
        tokio::time::sleep(backoff).await;
        backoff = config.reconnect.next_backoff(backoff);
    }
}

/// Opens the WebSocket with the bearer token in the upgrade request.
async fn connect(config: &ChannelConfig) -> Result<WsStream, ChannelError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ChannelError::Connect(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
        .map_err(|e| ChannelError::Connect(e.to_string()))?;
    request.headers_mut().insert(header::AUTHORIZATION, bearer);

    let (ws, _response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| ChannelError::Timeout)?
        .map_err(map_connect_error)?;
    Ok(ws)
}

fn map_connect_error(err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            ChannelError::Unauthorized
        }
        tungstenite::Error::Http(response) => {
            ChannelError::Connect(format!("HTTP status {}", response.status()))
        }
        other => ChannelError::Connect(other.to_string()),
    }
}

enum ReadOutcome {
    /// The socket ended; `announced` if `Connected` had been delivered.
    Closed { announced: bool },
    /// The event receiver was dropped for good.
    SubscriberGone,
}

/// Forwards server events until the socket closes.
///
/// Malformed frames are logged and skipped.
async fn read_events(mut ws: WsStream, tx: &mpsc::Sender<ChannelEvent>) -> ReadOutcome {
    let mut announced = false;
    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => {
                tracing::info!("push channel closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "push channel read error");
                break;
            }
        };

        let event = match event::decode(text.as_str()) {
            Ok(ServerEvent::Connected { user_id }) => {
                announced = true;
                ChannelEvent::Connected { user_id }
            }
            Ok(ServerEvent::NewMessage { message }) => ChannelEvent::NewMessage(message),
            Err(e) => {
                tracing::warn!(error = %e, "malformed push frame, skipping");
                continue;
            }
        };
        if tx.send(event).await.is_err() {
            return ReadOutcome::SubscriberGone;
        }
    }
    ReadOutcome::Closed { announced }
}
