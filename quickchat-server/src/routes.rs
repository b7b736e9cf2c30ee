//! HTTP message API, bearer authentication, and server startup.
//!
//! ```text
//! GET  /api/messages/users               sidebar + unseen counts
//! GET  /api/messages/{peerId}            conversation history
//! POST /api/messages/send/{peerId}       send a message
//! PUT  /api/messages/mark/{messageId}    acknowledge a message
//! GET  /ws                               push channel (WebSocket)
//! GET  /health                           liveness
//! ```

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::routing::{get, post, put};

use quickchat_proto::api::{HistoryPayload, MarkSeenAck, SendPayload, SidebarPayload, Success};
use quickchat_proto::message::{MessageBody, MessageId, UserId};

use crate::delivery::DeliveryCoordinator;
use crate::error::DeliveryError;
use crate::socket;
use crate::store::MessageStore;

/// Shared state handed to every handler.
pub type AppState<S> = Arc<DeliveryCoordinator<S>>;

/// The user authenticated by the request's bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl<S: MessageStore> FromRequestParts<AppState<S>> for AuthUser {
    type Rejection = DeliveryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(DeliveryError::Unauthorized)?;
        state
            .directory()
            .authenticate(token)
            .cloned()
            .map(Self)
            .ok_or_else(|| {
                tracing::debug!("rejected unknown bearer token");
                DeliveryError::Unauthorized
            })
    }
}

/// Builds the application router over a shared coordinator.
pub fn router<S: MessageStore>(state: AppState<S>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/api/messages/users", get(sidebar::<S>))
        .route("/api/messages/{peer_id}", get(history::<S>))
        .route("/api/messages/send/{peer_id}", post(send::<S>))
        .route("/api/messages/mark/{message_id}", put(mark_seen::<S>))
        .route("/ws", get(socket::ws_handler::<S>))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn sidebar<S: MessageStore>(
    State(state): State<AppState<S>>,
    AuthUser(me): AuthUser,
) -> Result<Json<Success<SidebarPayload>>, DeliveryError> {
    let payload = state.sidebar(&me).await?;
    Ok(Json(Success::new(payload)))
}

async fn history<S: MessageStore>(
    State(state): State<AppState<S>>,
    AuthUser(me): AuthUser,
    Path(peer_id): Path<String>,
) -> Result<Json<Success<HistoryPayload>>, DeliveryError> {
    let messages = state.history(&me, &UserId::new(peer_id)).await?;
    Ok(Json(Success::new(HistoryPayload { messages })))
}

async fn send<S: MessageStore>(
    State(state): State<AppState<S>>,
    AuthUser(me): AuthUser,
    Path(peer_id): Path<String>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> Result<Json<Success<SendPayload>>, DeliveryError> {
    let Json(body) = body.map_err(|e| DeliveryError::Rejected(e.body_text()))?;
    let new_message = state.send(&me, &UserId::new(peer_id), body).await?;
    Ok(Json(Success::new(SendPayload { new_message })))
}

async fn mark_seen<S: MessageStore>(
    State(state): State<AppState<S>>,
    AuthUser(me): AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Success<MarkSeenAck>>, DeliveryError> {
    let message_id: MessageId = message_id
        .parse()
        .map_err(|_| DeliveryError::NotFound(format!("message {message_id}")))?;
    let ack = state.mark_seen(&me, message_id).await?;
    Ok(Json(Success::new(ack)))
}

/// Starts the server with a pre-built coordinator and returns the bound
/// address and a join handle.
///
/// This is the entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server<S: MessageStore>(
    addr: &str,
    state: AppState<S>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
