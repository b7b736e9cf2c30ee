//! Message persistence contract and an in-memory implementation.
//!
//! The delivery layer only depends on the [`MessageStore`] trait. The store
//! is also the single source of truth for unseen counts: nothing else keeps
//! counters, so a lost push can never make them drift.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use quickchat_proto::message::{Message, MessageBody, MessageId, Timestamp, UserId};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing storage could not be reached. Nothing was written.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A message about to be persisted. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Author of the message.
    pub sender_id: UserId,
    /// Addressee of the message.
    pub recipient_id: UserId,
    /// Validated content.
    pub body: MessageBody,
}

/// Unseen counts for one recipient, grouped by sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnseenSnapshot {
    /// Count of `seen == false` messages per sender; zero counts are absent.
    pub counts: BTreeMap<UserId, u32>,
    /// Highest message id in the store when the counts were taken.
    pub watermark: Option<MessageId>,
}

/// Trait for persisting direct messages.
///
/// Implementations must hand out strictly increasing [`MessageId`]s and make
/// `seen` a one-way flag.
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a new unseen message and return the stored record.
    fn insert(
        &self,
        new: NewMessage,
    ) -> impl std::future::Future<Output = Result<Message, StoreError>> + Send;

    /// Look up a message by id.
    fn get(
        &self,
        id: MessageId,
    ) -> impl std::future::Future<Output = Result<Option<Message>, StoreError>> + Send;

    /// Set `seen` on a message.
    ///
    /// Returns `None` for an unknown id, otherwise whether this call flipped
    /// the flag (`false` if it was already set).
    fn mark_seen(
        &self,
        id: MessageId,
    ) -> impl std::future::Future<Output = Result<Option<bool>, StoreError>> + Send;

    /// Set `seen` on every message from `sender` to `recipient`, returning
    /// how many were flipped.
    fn mark_conversation_seen(
        &self,
        sender: &UserId,
        recipient: &UserId,
    ) -> impl std::future::Future<Output = Result<usize, StoreError>> + Send;

    /// All messages exchanged between `a` and `b`, ordered by id.
    fn conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Unseen counts for messages addressed to `recipient`.
    fn unseen_counts(
        &self,
        recipient: &UserId,
    ) -> impl std::future::Future<Output = Result<UnseenSnapshot, StoreError>> + Send;
}

#[derive(Default)]
struct Inner {
    messages: BTreeMap<MessageId, Message>,
    next_id: u64,
}

/// In-memory message store. Messages live for the lifetime of the process.
///
/// Thread-safe via [`RwLock`]; ids are assigned under the write lock so
/// insertion order and id order always agree.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    /// Whether the store holds no messages.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl MessageStore for InMemoryStore {
    async fn insert(&self, new: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let message = Message {
            id: MessageId::from_raw(inner.next_id),
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            body: new.body,
            created_at: Timestamp::now(),
            seen: false,
        };
        inner.messages.insert(message.id, message.clone());
        drop(inner);
        Ok(message)
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        Ok(self.inner.read().await.messages.get(&id).cloned())
    }

    async fn mark_seen(&self, id: MessageId) -> Result<Option<bool>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .messages
            .get_mut(&id)
            .map(|msg| !std::mem::replace(&mut msg.seen, true)))
    }

    async fn mark_conversation_seen(
        &self,
        sender: &UserId,
        recipient: &UserId,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut flipped = 0;
        for msg in inner.messages.values_mut() {
            if !msg.seen && &msg.sender_id == sender && &msg.recipient_id == recipient {
                msg.seen = true;
                flipped += 1;
            }
        }
        drop(inner);
        Ok(flipped)
    }

    async fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .values()
            .filter(|m| {
                (&m.sender_id == a && &m.recipient_id == b)
                    || (&m.sender_id == b && &m.recipient_id == a)
            })
            .cloned()
            .collect())
    }

    async fn unseen_counts(&self, recipient: &UserId) -> Result<UnseenSnapshot, StoreError> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<&UserId, u32> = HashMap::new();
        for msg in inner.messages.values() {
            if !msg.seen && &msg.recipient_id == recipient {
                *counts.entry(&msg.sender_id).or_default() += 1;
            }
        }
        Ok(UnseenSnapshot {
            counts: counts
                .into_iter()
                .map(|(sender, n)| (sender.clone(), n))
                .collect(),
            watermark: inner.messages.keys().next_back().copied(),
        })
    }
}
