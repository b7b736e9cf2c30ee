//! Push channel: one authenticated WebSocket per user.
//!
//! The connection lifecycle:
//! 1. Authenticate the upgrade request by bearer token.
//! 2. Queue the `connected` event, then register the writer channel so no
//!    push can overtake it.
//! 3. Forward queued events to the socket until either side closes.
//! 4. Unregister this connection (never a newer replacement).

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use quickchat_proto::event::{self, ServerEvent};
use quickchat_proto::message::UserId;

use crate::delivery::DeliveryCoordinator;
use crate::registry::Outbound;
use crate::routes::AuthUser;
use crate::store::MessageStore;

/// axum handler that authenticates and upgrades to a WebSocket connection.
///
/// An unauthenticated request is refused with 401 before any upgrade.
pub async fn ws_handler<S: MessageStore>(
    AuthUser(user): AuthUser,
    ws: WebSocketUpgrade,
    State(state): State<Arc<DeliveryCoordinator<S>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// Drives an upgraded WebSocket for `user` until it closes.
pub async fn handle_socket<S: MessageStore>(
    socket: WebSocket,
    user: UserId,
    state: Arc<DeliveryCoordinator<S>>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let _ = tx.send(Outbound::Event(ServerEvent::Connected {
        user_id: user.clone(),
    }));
    let (connection, replaced) = state.connections().register(&user, tx).await;
    if replaced {
        tracing::info!(user_id = %user, "replaced existing push channel");
    }
    tracing::info!(user_id = %user, connection = %connection, "push channel open");

    let writer_user = user.clone();
    let mut write_task = tokio::spawn(async move {
        // Ends on an explicit close or when the registry drops our sender.
        while let Some(Outbound::Event(ev)) = rx.recv().await {
            let text = match event::encode(&ev) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(user_id = %writer_user, error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(user_id = %writer_user, "WebSocket write failed");
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Clients never send anything meaningful; the reader only watches for close.
    let reader_user = user.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if let Message::Close(_) = msg {
                tracing::debug!(user_id = %reader_user, "received close frame");
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    if state.connections().unregister(&user, connection).await {
        tracing::info!(user_id = %user, connection = %connection, "push channel closed");
    } else {
        tracing::debug!(user_id = %user, connection = %connection, "stale push channel closed");
    }
}
