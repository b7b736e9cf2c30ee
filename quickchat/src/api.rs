//! HTTP message API client.
//!
//! [`ChatApi`] is the seam between the session driver and the server; the
//! driver only ever talks to it, so tests can substitute a scripted fake.
//! [`HttpChatApi`] is the real implementation over `reqwest`.

use std::future::Future;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use quickchat_proto::api::{
    self, HistoryPayload, MarkSeenAck, ReplyError, SendPayload, SidebarPayload,
};
use quickchat_proto::message::{Message, MessageBody, MessageId, UserId};

/// Errors returned by message API calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The user or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server refused the request as invalid.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The server or the network is unavailable. Safe to retry.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// The bearer credential was refused.
    #[error("not authorized")]
    Unauthorized,

    /// The reply did not match the wire format.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ApiError {
    /// Maps a failed reply's status code and message to an error.
    #[must_use]
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::NOT_FOUND => Self::NotFound(message),
            StatusCode::BAD_REQUEST => Self::Rejected(message),
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            s if s.is_server_error() => Self::Unavailable(message),
            s => Self::Protocol(format!("unexpected status {s}: {message}")),
        }
    }
}

/// Message API used by the session driver.
pub trait ChatApi: Send + Sync + 'static {
    /// Fetch every peer and the caller's unseen counts.
    fn sidebar(&self) -> impl Future<Output = Result<SidebarPayload, ApiError>> + Send;

    /// Fetch the conversation with `peer`, oldest first.
    ///
    /// The server marks the peer's messages to the caller as seen.
    fn history(
        &self,
        peer: &UserId,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Send `body` to `peer`, returning the stored message.
    fn send(
        &self,
        peer: &UserId,
        body: &MessageBody,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// Acknowledge a message addressed to the caller.
    fn mark_seen(
        &self,
        message_id: MessageId,
    ) -> impl Future<Output = Result<MarkSeenAck, ApiError>> + Send;
}

/// [`ChatApi`] over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpChatApi {
    /// Creates a client for the server at `base` (e.g. `http://127.0.0.1:5000`).
    #[must_use]
    pub fn new(base: Url, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            token: token.into(),
        }
    }

    /// Builds `base/api/messages/<segments...>`, escaping each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Protocol(format!("server url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["api", "messages"])
            .extend(segments);
        Ok(url)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        match api::decode_reply::<T>(&bytes) {
            Ok(payload) if status.is_success() => Ok(payload),
            Ok(_) => Err(ApiError::Protocol(format!(
                "successful reply with status {status}"
            ))),
            Err(ReplyError::Failed { message }) => Err(ApiError::from_status(status, message)),
            Err(ReplyError::Malformed(reason)) if status.is_success() => {
                Err(ApiError::Protocol(reason))
            }
            Err(ReplyError::Malformed(reason)) => Err(ApiError::from_status(status, reason)),
        }
    }
}

impl ChatApi for HttpChatApi {
    async fn sidebar(&self) -> Result<SidebarPayload, ApiError> {
        let url = self.endpoint(&["users"])?;
        self.execute(self.client.get(url)).await
    }

    async fn history(&self, peer: &UserId) -> Result<Vec<Message>, ApiError> {
        let url = self.endpoint(&[peer.as_str()])?;
        let payload: HistoryPayload = self.execute(self.client.get(url)).await?;
        Ok(payload.messages)
    }

    async fn send(&self, peer: &UserId, body: &MessageBody) -> Result<Message, ApiError> {
        let url = self.endpoint(&["send", peer.as_str()])?;
        let payload: SendPayload = self.execute(self.client.post(url).json(body)).await?;
        Ok(payload.new_message)
    }

    async fn mark_seen(&self, message_id: MessageId) -> Result<MarkSeenAck, ApiError> {
        let id = message_id.to_string();
        let url = self.endpoint(&["mark", id.as_str()])?;
        self.execute(self.client.put(url)).await
    }
}
