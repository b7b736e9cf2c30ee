//! HTTP reply envelope and payload types.
//!
//! Every reply body is a JSON object with a `success` flag. Successful
//! replies carry their payload fields next to the flag; failed replies carry
//! a human-readable `message`:
//!
//! ```text
//! {"success": true, "messages": [...]}
//! {"success": false, "message": "user not found"}
//! ```
//!
//! Producer and consumer share the payload structs below, so a field name
//! can only be spelled one way. In particular the unseen counts always travel
//! as `unseenMessages` and a sidebar reply without that field is rejected as
//! malformed instead of being read as "no unseen messages".

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, UserId};

/// A successful reply: `{"success": true, ...payload}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Success<T> {
    success: bool,
    #[serde(flatten)]
    payload: T,
}

impl<T> Success<T> {
    /// Wraps a payload in a successful reply.
    pub const fn new(payload: T) -> Self {
        Self {
            success: true,
            payload,
        }
    }
}

/// A failed reply: `{"success": false, "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    success: bool,
    /// Human-readable failure description.
    pub message: String,
}

impl Failure {
    /// Builds a failed reply with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Error produced while decoding a reply body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    /// The server answered with `success: false`.
    #[error("request failed: {message}")]
    Failed {
        /// The server's failure description.
        message: String,
    },
    /// The body is not a valid reply envelope or payload.
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Decodes a reply body, returning the payload of a successful reply.
///
/// # Errors
///
/// Returns [`ReplyError::Failed`] when the body has `success: false`, and
/// [`ReplyError::Malformed`] when the body is not JSON, lacks the `success`
/// flag, or its payload does not match `T`.
pub fn decode_reply<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ReplyError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ReplyError::Malformed(e.to_string()))?;
    match value.get("success").and_then(serde_json::Value::as_bool) {
        Some(true) => {
            serde_json::from_value(value).map_err(|e| ReplyError::Malformed(e.to_string()))
        }
        Some(false) => {
            let message = value
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Err(ReplyError::Failed { message })
        }
        None => Err(ReplyError::Malformed("missing success flag".into())),
    }
}

/// Public profile of a user as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// The user's identifier.
    pub id: UserId,
    /// Display name.
    pub full_name: String,
    /// Optional profile blurb.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// `GET /api/messages/users`: peers plus unseen counts by sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarPayload {
    /// Every other registered user.
    pub users: Vec<UserSummary>,
    /// Number of unseen messages per sender. Senders with no unseen
    /// messages are absent.
    pub unseen_messages: BTreeMap<UserId, u32>,
    /// Highest message id that existed when the counts were computed.
    /// Messages with a greater id are not reflected in `unseen_messages`.
    pub watermark: Option<MessageId>,
}

/// `GET /api/messages/{peerId}`: the conversation, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPayload {
    /// Messages between the caller and the peer, ordered by id.
    pub messages: Vec<Message>,
}

/// `POST /api/messages/send/{peerId}`: the persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    /// The message exactly as stored by the server.
    pub new_message: Message,
}

/// `PUT /api/messages/mark/{messageId}`: acknowledgement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSeenAck {
    /// The acknowledged message.
    pub message_id: MessageId,
    /// `false` when the message had already been marked seen.
    pub newly_marked: bool,
}
