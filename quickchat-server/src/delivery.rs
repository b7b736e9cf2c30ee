//! Delivery coordinator: persist, push, acknowledge.
//!
//! A send is committed once the store has accepted the message. Pushing it
//! to the recipient's open channel happens afterwards and is best effort:
//! a missing or broken channel never fails the send, because the recipient
//! will read the message on its next history or sidebar fetch anyway.

use quickchat_proto::api::{MarkSeenAck, SidebarPayload};
use quickchat_proto::event::ServerEvent;
use quickchat_proto::message::{MAX_TEXT_LEN, Message, MessageBody, MessageId, UserId};

use crate::directory::UserDirectory;
use crate::error::DeliveryError;
use crate::registry::{ConnectionRegistry, PushOutcome};
use crate::store::{MessageStore, NewMessage};

/// Coordinates message persistence and live delivery.
pub struct DeliveryCoordinator<S: MessageStore> {
    store: S,
    directory: UserDirectory,
    connections: ConnectionRegistry,
    max_text_len: usize,
}

impl<S: MessageStore> DeliveryCoordinator<S> {
    /// Creates a coordinator over `store` for the users in `directory`.
    #[must_use]
    pub fn new(store: S, directory: UserDirectory) -> Self {
        Self {
            store,
            directory,
            connections: ConnectionRegistry::new(),
            max_text_len: MAX_TEXT_LEN,
        }
    }

    /// Overrides the maximum accepted text length.
    #[must_use]
    pub const fn with_max_text_len(mut self, max_text_len: usize) -> Self {
        self.max_text_len = max_text_len;
        self
    }

    /// The registered users.
    pub const fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// The open push channels.
    pub const fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// The underlying message store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Persist a message from `sender` to `recipient` and push it live.
    ///
    /// Returns the stored message regardless of whether the push reached
    /// the recipient.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Rejected`] for an empty or oversized body, or a
    ///   message addressed to the sender.
    /// - [`DeliveryError::NotFound`] if the recipient is not registered.
    /// - [`DeliveryError::Unavailable`] if the store write failed; nothing was
    ///   persisted.
    pub async fn send(
        &self,
        sender: &UserId,
        recipient: &UserId,
        body: MessageBody,
    ) -> Result<Message, DeliveryError> {
        body.validate(self.max_text_len)?;
        if sender == recipient {
            return Err(DeliveryError::Rejected(
                "cannot send a message to yourself".into(),
            ));
        }
        if !self.directory.contains(recipient) {
            return Err(DeliveryError::NotFound(format!("user {recipient}")));
        }

        let message = self
            .store
            .insert(NewMessage {
                sender_id: sender.clone(),
                recipient_id: recipient.clone(),
                body,
            })
            .await
            .inspect_err(|e| {
                tracing::error!(from = %sender, to = %recipient, error = %e, "message write failed");
            })?;

        let outcome = self
            .connections
            .push(
                recipient,
                ServerEvent::NewMessage {
                    message: message.clone(),
                },
            )
            .await;
        match outcome {
            PushOutcome::Queued => {
                tracing::debug!(message_id = %message.id, to = %recipient, "message pushed");
            }
            PushOutcome::Offline => {
                tracing::debug!(message_id = %message.id, to = %recipient, "recipient offline, left for fetch");
            }
            PushOutcome::Dropped => {
                tracing::warn!(
                    message_id = %message.id,
                    to = %recipient,
                    "push channel closed mid-delivery, left for fetch"
                );
            }
        }

        Ok(message)
    }

    /// Mark a message addressed to `viewer` as seen.
    ///
    /// Idempotent: acknowledging an already-seen message succeeds with
    /// `newly_marked == false`.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::NotFound`] if the message does not exist or is not
    ///   addressed to `viewer`.
    /// - [`DeliveryError::Unavailable`] if the store could not be reached.
    pub async fn mark_seen(
        &self,
        viewer: &UserId,
        message_id: MessageId,
    ) -> Result<MarkSeenAck, DeliveryError> {
        let not_found = || DeliveryError::NotFound(format!("message {message_id}"));
        let message = self.store.get(message_id).await?.ok_or_else(not_found)?;
        if &message.recipient_id != viewer {
            return Err(not_found());
        }
        let newly_marked = self.store.mark_seen(message_id).await?.ok_or_else(not_found)?;
        tracing::debug!(message_id = %message_id, user_id = %viewer, newly_marked, "message acknowledged");
        Ok(MarkSeenAck {
            message_id,
            newly_marked,
        })
    }

    /// Open the conversation between `viewer` and `peer`.
    ///
    /// Every unseen message from `peer` to `viewer` is marked seen before the
    /// conversation is read, so the returned history and the next sidebar
    /// fetch both reflect that the conversation was opened.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::NotFound`] if `peer` is not registered.
    /// - [`DeliveryError::Unavailable`] if the store could not be reached.
    pub async fn history(
        &self,
        viewer: &UserId,
        peer: &UserId,
    ) -> Result<Vec<Message>, DeliveryError> {
        if !self.directory.contains(peer) {
            return Err(DeliveryError::NotFound(format!("user {peer}")));
        }
        let marked = self.store.mark_conversation_seen(peer, viewer).await?;
        if marked > 0 {
            tracing::debug!(user_id = %viewer, peer = %peer, marked, "conversation opened, marked seen");
        }
        Ok(self.store.conversation(viewer, peer).await?)
    }

    /// The sidebar for `viewer`: every other user plus unseen counts.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Unavailable`] if the store could not be
    /// reached.
    pub async fn sidebar(&self, viewer: &UserId) -> Result<SidebarPayload, DeliveryError> {
        let snapshot = self.store.unseen_counts(viewer).await?;
        Ok(SidebarPayload {
            users: self.directory.peers_of(viewer),
            unseen_messages: snapshot.counts,
            watermark: snapshot.watermark,
        })
    }
}
