//! Push events sent by the server over the per-user WebSocket channel.
//!
//! Events travel as JSON text frames tagged by an `event` field:
//!
//! ```text
//! {"event":"connected","userId":"bob"}
//! {"event":"newMessage","message":{...}}
//! ```

use serde::{Deserialize, Serialize};

use crate::message::{Message, UserId};

/// Events pushed from the server to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// The channel is registered; pushes for `user_id` flow from here on.
    ///
    /// Always the first event on a fresh connection.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// The authenticated user this channel belongs to.
        user_id: UserId,
    },
    /// A message addressed to the channel's user was just persisted.
    NewMessage {
        /// The full persisted message.
        message: Message,
    },
}

/// Error type for push event encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Encodes a [`ServerEvent`] into the text of a WebSocket frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode(event: &ServerEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a [`ServerEvent`] from the text of a WebSocket frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not a known event.
pub fn decode(text: &str) -> Result<ServerEvent, CodecError> {
    Ok(serde_json::from_str(text)?)
}
