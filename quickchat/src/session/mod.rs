//! Client reconciliation state machine.
//!
//! [`Session`] is a plain, synchronous state machine. Every input (channel
//! lifecycle, a pushed message, a user command, a request result) is a
//! method call that updates the state and returns the [`Effect`]s the caller
//! must perform. It never does I/O itself, so every interleaving of pushes
//! and responses can be replayed in a test.
//!
//! ```text
//! Disconnected --connected--> Idle --select(P)--> Viewing(P)
//!      ^                        |                     |
//!      +------disconnected------+---------------------+
//! ```
//!
//! Unseen counts come from three places: the sidebar snapshot fetched on
//! every (re)connect, `+1` for each pushed message from a peer that is not
//! open, and `0` for the peer being viewed. Pushes that arrive while the
//! snapshot is in flight are remembered and replayed on top of it when they
//! are newer than the snapshot's watermark.

mod unseen;
mod view;

pub use unseen::UnseenMap;
pub use view::{ConversationView, LoadState};

use std::fmt;

use quickchat_proto::api::{MarkSeenAck, SidebarPayload, UserSummary};
use quickchat_proto::message::{MAX_TEXT_LEN, Message, MessageBody, MessageId, UserId, ValidationError};

use crate::api::ApiError;

/// Identifies one issued fetch; only the latest token of each kind is
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection and navigation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No push channel.
    #[default]
    Disconnected,
    /// Connected, no conversation open.
    Idle,
    /// Connected with the conversation with this peer open.
    Viewing(UserId),
}

/// Work the caller must carry out on the session's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fetch the sidebar; report back through [`Session::apply_sidebar`].
    FetchSidebar {
        /// Token to hand back with the result.
        token: RequestToken,
    },
    /// Fetch history; report back through [`Session::apply_history`].
    FetchHistory {
        /// Token to hand back with the result.
        token: RequestToken,
        /// Peer whose conversation to fetch.
        peer: UserId,
    },
    /// Send a message; report back through [`Session::apply_sent`].
    Send {
        /// Recipient.
        peer: UserId,
        /// Content.
        body: MessageBody,
    },
    /// Acknowledge a message; report back through [`Session::apply_mark_seen`].
    MarkSeen {
        /// The message appended to the open conversation.
        message_id: MessageId,
    },
    /// Tell the user something went wrong.
    Notify(Notice),
}

/// User-facing report of a failure the session recovered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The sidebar could not be refreshed; counts are from before.
    SidebarUnavailable(ApiError),
    /// History for `peer` could not be loaded.
    HistoryUnavailable {
        /// Peer whose history failed.
        peer: UserId,
        /// Cause.
        error: ApiError,
    },
    /// A message to `peer` was not sent.
    SendFailed {
        /// Intended recipient.
        peer: UserId,
        /// Cause.
        error: ApiError,
    },
    /// The server no longer accepts our credential.
    SessionExpired,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SidebarUnavailable(e) => write!(f, "could not refresh conversations: {e}"),
            Self::HistoryUnavailable { peer, error } => {
                write!(f, "could not load conversation with {peer}: {error}")
            }
            Self::SendFailed { peer, error } => write!(f, "message to {peer} not sent: {error}"),
            Self::SessionExpired => write!(f, "session expired, please sign in again"),
        }
    }
}

/// Commands that are not valid in the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The push channel is down.
    #[error("not connected")]
    NotConnected,

    /// Sending needs an open conversation.
    #[error("no conversation is open")]
    NoConversation,

    /// A conversation needs someone else on the other end.
    #[error("cannot open a conversation with yourself")]
    SelfConversation,

    /// The message content is invalid.
    #[error(transparent)]
    InvalidMessage(#[from] ValidationError),
}

/// Read-only copy of the session published after every step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Our own id, once the server has told us.
    pub me: Option<UserId>,
    /// Connection and navigation state.
    pub state: SessionState,
    /// Every other user, from the last sidebar fetch.
    pub users: Vec<UserSummary>,
    /// Unseen counts per peer.
    pub unseen: UnseenMap,
    /// Whether the counts were reconciled with the server since connecting.
    pub counts_trusted: bool,
    /// The open conversation.
    pub view: Option<ConversationView>,
    /// Number of sidebar replies applied so far.
    pub reconciliations: u64,
}

/// Reconciliation state for one signed-in user.
#[derive(Debug, Default)]
pub struct Session {
    me: Option<UserId>,
    state: SessionState,
    users: Vec<UserSummary>,
    unseen: UnseenMap,
    counts_trusted: bool,
    view: Option<ConversationView>,
    next_token: u64,
    sidebar_token: Option<RequestToken>,
    history_token: Option<RequestToken>,
    /// Pushes counted while a sidebar fetch was in flight.
    replay: Vec<Message>,
    /// Highest id covered by the last applied sidebar.
    watermark: Option<MessageId>,
    reconciliations: u64,
}

impl Session {
    /// A fresh, disconnected session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Our own user id, known once the channel has connected.
    #[must_use]
    pub const fn me(&self) -> Option<&UserId> {
        self.me.as_ref()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Peer whose conversation is open.
    #[must_use]
    pub const fn selected(&self) -> Option<&UserId> {
        match &self.state {
            SessionState::Viewing(peer) => Some(peer),
            _ => None,
        }
    }

    /// Whether the push channel is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    /// Unseen counts.
    #[must_use]
    pub const fn unseen(&self) -> &UnseenMap {
        &self.unseen
    }

    /// Users from the last sidebar.
    #[must_use]
    pub fn users(&self) -> &[UserSummary] {
        &self.users
    }

    /// The open conversation.
    #[must_use]
    pub const fn view(&self) -> Option<&ConversationView> {
        self.view.as_ref()
    }

    /// Whether counts were reconciled since the last connect.
    #[must_use]
    pub const fn counts_trusted(&self) -> bool {
        self.counts_trusted
    }

    /// Copies the observable state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            me: self.me.clone(),
            state: self.state.clone(),
            users: self.users.clone(),
            unseen: self.unseen.clone(),
            counts_trusted: self.counts_trusted,
            view: self.view.clone(),
            reconciliations: self.reconciliations,
        }
    }

    const fn issue_token(&mut self) -> RequestToken {
        self.next_token += 1;
        RequestToken(self.next_token)
    }

    fn start_sidebar_fetch(&mut self) -> Effect {
        let token = self.issue_token();
        self.sidebar_token = Some(token);
        self.replay.clear();
        Effect::FetchSidebar { token }
    }

    /// The push channel connected as `user_id`.
    ///
    /// Any conversation is closed and the counts are re-fetched; pushes
    /// missed while disconnected are only visible through that fetch.
    pub fn on_connected(&mut self, user_id: UserId) -> Vec<Effect> {
        tracing::info!(user_id = %user_id, "session connected");
        self.me = Some(user_id);
        self.state = SessionState::Idle;
        self.view = None;
        self.history_token = None;
        self.counts_trusted = false;
        // Ids may have restarted with the server.
        self.watermark = None;
        vec![self.start_sidebar_fetch()]
    }

    /// The push channel went down. Results of requests issued before now
    /// are ignored.
    pub fn on_disconnected(&mut self) {
        tracing::info!("session disconnected");
        self.state = SessionState::Disconnected;
        self.sidebar_token = None;
        self.history_token = None;
        self.counts_trusted = false;
        self.replay.clear();
    }

    /// Re-fetch the sidebar while connected.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] while disconnected.
    pub fn refresh(&mut self) -> Result<Vec<Effect>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        Ok(vec![self.start_sidebar_fetch()])
    }

    /// Open the conversation with `peer`.
    ///
    /// Clears the peer's unseen count immediately and fetches its history.
    /// A history request still in flight for another peer is superseded.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] while disconnected.
    /// - [`SessionError::SelfConversation`] if `peer` is us.
    pub fn select_peer(&mut self, peer: UserId) -> Result<Vec<Effect>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if self.me.as_ref() == Some(&peer) {
            return Err(SessionError::SelfConversation);
        }
        let cleared = self.unseen.clear(&peer);
        // Opening marks these seen on the server; they must not come back
        // when an in-flight sidebar is applied.
        self.replay.retain(|m| m.sender_id != peer);
        tracing::debug!(peer = %peer, cleared, "opening conversation");
        self.state = SessionState::Viewing(peer.clone());
        self.view = Some(ConversationView::loading(peer.clone()));
        let token = self.issue_token();
        self.history_token = Some(token);
        Ok(vec![Effect::FetchHistory { token, peer }])
    }

    /// A `newMessage` push arrived.
    ///
    /// From the open conversation's peer it is appended and acknowledged;
    /// from anyone else it bumps that sender's unseen count.
    pub fn receive_push(&mut self, message: Message) -> Vec<Effect> {
        if self.me.as_ref() != Some(&message.recipient_id) {
            tracing::debug!(message_id = %message.id, "ignoring push addressed to someone else");
            return Vec::new();
        }

        let from_selected = self.selected() == Some(&message.sender_id);
        if from_selected && let Some(view) = self.view.as_mut() {
            let message_id = message.id;
            if !view.insert(message) {
                tracing::debug!(message_id = %message_id, "duplicate push ignored");
                return Vec::new();
            }
            return vec![Effect::MarkSeen { message_id }];
        }

        if self.watermark.is_some_and(|w| message.id <= w) {
            tracing::debug!(message_id = %message.id, "push already counted by the sidebar");
            return Vec::new();
        }

        let count = self.unseen.increment(&message.sender_id);
        tracing::debug!(from = %message.sender_id, count, "unseen message");
        if self.sidebar_token.is_some() {
            self.replay.push(message);
        }
        Vec::new()
    }

    /// Apply the result of the sidebar fetch issued with `token`.
    pub fn apply_sidebar(
        &mut self,
        token: RequestToken,
        result: Result<SidebarPayload, ApiError>,
    ) -> Vec<Effect> {
        if self.sidebar_token != Some(token) {
            tracing::debug!(token = %token, "stale sidebar discarded");
            return Vec::new();
        }
        self.sidebar_token = None;
        let replay = std::mem::take(&mut self.replay);

        match result {
            Ok(payload) => {
                self.users = payload.users;
                let selected = self.selected().cloned();
                self.unseen.replace(payload.unseen_messages, selected.as_ref());
                let mut replayed = 0_usize;
                for message in replay {
                    if payload.watermark.is_none_or(|w| message.id > w)
                        && selected.as_ref() != Some(&message.sender_id)
                    {
                        self.unseen.increment(&message.sender_id);
                        replayed += 1;
                    }
                }
                self.watermark = payload.watermark;
                self.counts_trusted = true;
                self.reconciliations += 1;
                tracing::debug!(
                    peers = self.unseen.len(),
                    total = self.unseen.total(),
                    replayed,
                    "unseen counts reconciled"
                );
                Vec::new()
            }
            Err(error) => {
                tracing::warn!(error = %error, "sidebar fetch failed");
                vec![Effect::Notify(notice_for(error, Notice::SidebarUnavailable))]
            }
        }
    }

    /// Apply the result of the history fetch for `peer` issued with `token`.
    ///
    /// Ignored unless `token` is the latest history request and `peer` is
    /// still open.
    pub fn apply_history(
        &mut self,
        token: RequestToken,
        peer: &UserId,
        result: Result<Vec<Message>, ApiError>,
    ) -> Vec<Effect> {
        if self.history_token != Some(token) || self.selected() != Some(peer) {
            tracing::debug!(token = %token, peer = %peer, "stale history discarded");
            return Vec::new();
        }
        self.history_token = None;
        let Some(view) = self.view.as_mut() else {
            return Vec::new();
        };

        match result {
            Ok(messages) => {
                view.load(messages);
                self.unseen.clear(peer);
                tracing::debug!(peer = %peer, messages = view.len(), "history loaded");
                Vec::new()
            }
            Err(error) => {
                view.fail();
                tracing::warn!(peer = %peer, error = %error, "history fetch failed");
                let peer = peer.clone();
                vec![Effect::Notify(notice_for(error, |error| {
                    Notice::HistoryUnavailable { peer, error }
                }))]
            }
        }
    }

    /// Send `body` to the open conversation's peer.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] while disconnected.
    /// - [`SessionError::NoConversation`] if no conversation is open.
    /// - [`SessionError::InvalidMessage`] for empty or oversized content.
    pub fn send(&mut self, body: MessageBody) -> Result<Vec<Effect>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let peer = self.selected().cloned().ok_or(SessionError::NoConversation)?;
        body.validate(MAX_TEXT_LEN)?;
        Ok(vec![Effect::Send { peer, body }])
    }

    /// Apply the result of sending a message to `peer`.
    ///
    /// The stored message joins the view only if `peer` is still open.
    pub fn apply_sent(&mut self, peer: &UserId, result: Result<Message, ApiError>) -> Vec<Effect> {
        match result {
            Ok(message) => {
                if let Some(view) = self.view.as_mut()
                    && view.peer() == peer
                    && view.involves(&message)
                {
                    view.insert(message);
                }
                Vec::new()
            }
            Err(error) => {
                tracing::warn!(peer = %peer, error = %error, "send failed");
                let peer = peer.clone();
                vec![Effect::Notify(notice_for(error, |error| Notice::SendFailed {
                    peer,
                    error,
                }))]
            }
        }
    }

    /// Apply the result of acknowledging `message_id`. Failures are only
    /// logged; the next history fetch marks the message seen anyway.
    pub fn apply_mark_seen(&self, message_id: MessageId, result: Result<MarkSeenAck, ApiError>) {
        match result {
            Ok(ack) => {
                tracing::debug!(message_id = %message_id, newly_marked = ack.newly_marked, "message acknowledged");
            }
            Err(error) => {
                tracing::warn!(message_id = %message_id, error = %error, "mark-seen failed");
            }
        }
    }
}

/// `Unauthorized` always means the session expired, whatever the request.
fn notice_for(error: ApiError, wrap: impl FnOnce(ApiError) -> Notice) -> Notice {
    match error {
        ApiError::Unauthorized => Notice::SessionExpired,
        other => wrap(other),
    }
}
