//! The open conversation: one peer's messages ordered by id.

use quickchat_proto::message::{Message, UserId};

/// Whether the conversation's history has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// History requested, not yet applied.
    Loading,
    /// History applied.
    Ready,
    /// The history request failed; only pushed messages are shown.
    Failed,
}

/// Messages exchanged with the selected peer.
///
/// Messages stay sorted by id and each id appears once, whatever order
/// pushes, sends and history arrive in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    peer: UserId,
    messages: Vec<Message>,
    state: LoadState,
}

impl ConversationView {
    /// An empty view waiting for `peer`'s history.
    #[must_use]
    pub const fn loading(peer: UserId) -> Self {
        Self {
            peer,
            messages: Vec::new(),
            state: LoadState::Loading,
        }
    }

    /// The peer this conversation is with.
    #[must_use]
    pub const fn peer(&self) -> &UserId {
        &self.peer
    }

    /// Messages in id order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current load state.
    #[must_use]
    pub const fn state(&self) -> LoadState {
        self.state
    }

    /// Whether `message` belongs to this conversation.
    #[must_use]
    pub fn involves(&self, message: &Message) -> bool {
        message.sender_id == self.peer || message.recipient_id == self.peer
    }

    /// Inserts `message` in id order. Returns `false` if it was already
    /// present.
    pub fn insert(&mut self, message: Message) -> bool {
        match self.messages.binary_search_by_key(&message.id, |m| m.id) {
            Ok(_) => false,
            Err(pos) => {
                self.messages.insert(pos, message);
                true
            }
        }
    }

    /// Merges fetched history into the view and marks it ready.
    ///
    /// Fetched copies replace existing ones (they carry the server's `seen`
    /// flag); messages pushed while the fetch was in flight are kept.
    pub fn load(&mut self, history: Vec<Message>) {
        for message in history {
            match self.messages.binary_search_by_key(&message.id, |m| m.id) {
                Ok(pos) => self.messages[pos] = message,
                Err(pos) => self.messages.insert(pos, message),
            }
        }
        self.state = LoadState::Ready;
    }

    /// Marks the history request as failed.
    pub const fn fail(&mut self) {
        self.state = LoadState::Failed;
    }

    /// Number of messages shown.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no message is shown.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
