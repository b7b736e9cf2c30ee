//! Message and identity types for the `QuickChat` protocol.
//!
//! These are the JSON shapes exchanged between the server and its clients,
//! both in HTTP replies and in push events. Field names on the wire are
//! camelCase (`senderId`, `createdAt`).

use serde::{Deserialize, Serialize};

/// Maximum allowed length of a message's text in bytes (64 KB).
pub const MAX_TEXT_LEN: usize = 64 * 1024;

/// Opaque identifier of a registered user, issued outside this system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier.
///
/// Identifiers are handed out in strictly increasing order as messages are
/// persisted, so comparing two ids orders messages by creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Creates a `MessageId` from its raw sequence number.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Content of a direct message: text, a media reference, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Plain text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Reference (URL) to an already uploaded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl MessageBody {
    /// A text-only body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    /// An image-only body.
    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            text: None,
            image: Some(reference.into()),
        }
    }

    /// Checks that the body carries something and that its text fits.
    ///
    /// A body whose text and image are both missing or blank is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] for an empty body, or
    /// [`ValidationError::TooLarge`] if the text exceeds `max_text_len` bytes.
    pub fn validate(&self, max_text_len: usize) -> Result<(), ValidationError> {
        let has_text = self.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_image = self.image.as_deref().is_some_and(|i| !i.trim().is_empty());
        if !has_text && !has_image {
            return Err(ValidationError::Empty);
        }
        if let Some(text) = &self.text
            && text.len() > max_text_len
        {
            return Err(ValidationError::TooLarge {
                size: text.len(),
                max: max_text_len,
            });
        }
        Ok(())
    }
}

/// Error returned when a message body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Neither text nor image carries any content.
    #[error("message content is empty")]
    Empty,
    /// Text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// A persisted direct message.
///
/// Everything but `seen` is fixed at creation. `seen` moves from `false` to
/// `true` once, when the recipient acknowledges the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Addressee of the message.
    pub recipient_id: UserId,
    /// Text and/or media reference.
    #[serde(flatten)]
    pub body: MessageBody,
    /// When the server persisted the message.
    pub created_at: Timestamp,
    /// Whether the recipient has acknowledged the message.
    #[serde(default)]
    pub seen: bool,
}

impl Message {
    /// The other participant of this message, seen from `me`.
    ///
    /// Returns `None` if `me` is neither the sender nor the recipient.
    #[must_use]
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        if &self.sender_id == me {
            Some(&self.recipient_id)
        } else if &self.recipient_id == me {
            Some(&self.sender_id)
        } else {
            None
        }
    }
}
