//! Async event loop that owns the [`Session`].
//!
//! # Architecture
//!
//! ```text
//! PushChannel ── ChannelEvent ──┐
//! UI ─────────── SessionCommand ─┼─> SessionDriver ── watch<SessionSnapshot> ──> UI
//! request tasks ─ Completion ────┘        │          ── Notice ────────────────> UI
//!                                         └── spawns ChatApi requests
//! ```
//!
//! The driver is the only writer of the session. Requests run on their own
//! tasks and report back as completions, so a slow fetch never delays a
//! push from being applied.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use quickchat_proto::api::{MarkSeenAck, SidebarPayload};
use quickchat_proto::message::{Message, MessageBody, MessageId, UserId};

use crate::api::{ApiError, ChatApi};
use crate::channel::{ChannelEvent, Subscription};
use crate::session::{Effect, Notice, RequestToken, Session, SessionError, SessionSnapshot};

/// Commands sent from the UI to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Open the conversation with a peer.
    SelectPeer(UserId),
    /// Send to the open conversation.
    Send(MessageBody),
    /// Re-fetch the sidebar.
    Refresh,
    /// Stop the driver.
    Shutdown,
}

/// Everything the UI is told besides snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverNotice {
    /// A request failed and the session recovered.
    Session(Notice),
    /// A command was not valid in the current state.
    Refused(SessionError),
}

impl std::fmt::Display for DriverNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session(notice) => write!(f, "{notice}"),
            Self::Refused(error) => write!(f, "{error}"),
        }
    }
}

/// The driver is no longer running.
#[derive(Debug, thiserror::Error)]
#[error("session driver has stopped")]
pub struct DriverClosed;

/// Result of a request task.
#[derive(Debug)]
enum Completion {
    Sidebar(RequestToken, Result<SidebarPayload, ApiError>),
    History(RequestToken, UserId, Result<Vec<Message>, ApiError>),
    Sent(UserId, Result<Message, ApiError>),
    MarkSeen(MessageId, Result<MarkSeenAck, ApiError>),
}

/// Owns a [`Session`] and drives it from channel events, commands and
/// request completions.
pub struct SessionDriver<A: ChatApi> {
    session: Session,
    api: Arc<A>,
    snapshots: watch::Sender<SessionSnapshot>,
    notices: mpsc::UnboundedSender<DriverNotice>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

/// UI-side handle to a running [`SessionDriver`].
pub struct DriverHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    notices: mpsc::UnboundedReceiver<DriverNotice>,
    task: tokio::task::JoinHandle<()>,
}

impl<A: ChatApi> SessionDriver<A> {
    /// Spawns a driver fed by `events` and returns its handle.
    pub fn spawn(api: Arc<A>, events: Subscription, command_capacity: usize) -> DriverHandle {
        let (snapshots_tx, snapshots_rx) = watch::channel(SessionSnapshot::default());
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(command_capacity.max(1));
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let driver = Self {
            session: Session::new(),
            api,
            snapshots: snapshots_tx,
            notices: notices_tx,
            completions_tx,
            completions_rx,
        };
        let task = tokio::spawn(driver.run(events, commands_rx));

        DriverHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
            notices: notices_rx,
            task,
        }
    }

    async fn run(mut self, mut events: Subscription, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("push channel ended, driver stopping");
                        break;
                    };
                    self.on_channel_event(event);
                }
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => {
                            tracing::info!("session driver shutting down");
                            break;
                        }
                        Some(command) => self.on_command(command),
                    }
                }
                Some(done) = self.completions_rx.recv() => {
                    self.on_completion(done);
                }
            }
            self.snapshots.send_replace(self.session.snapshot());
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        let effects = match event {
            ChannelEvent::Connected { user_id } => self.session.on_connected(user_id),
            ChannelEvent::Disconnected => {
                self.session.on_disconnected();
                Vec::new()
            }
            ChannelEvent::NewMessage(message) => self.session.receive_push(message),
            ChannelEvent::Unauthorized => {
                self.session.on_disconnected();
                vec![Effect::Notify(Notice::SessionExpired)]
            }
        };
        self.perform(effects);
    }

    fn on_command(&mut self, command: SessionCommand) {
        let result = match command {
            SessionCommand::SelectPeer(peer) => self.session.select_peer(peer),
            SessionCommand::Send(body) => self.session.send(body),
            SessionCommand::Refresh => self.session.refresh(),
            SessionCommand::Shutdown => Ok(Vec::new()),
        };
        match result {
            Ok(effects) => self.perform(effects),
            Err(error) => {
                tracing::debug!(error = %error, "command refused");
                let _ = self.notices.send(DriverNotice::Refused(error));
            }
        }
    }

    fn on_completion(&mut self, done: Completion) {
        let effects = match done {
            Completion::Sidebar(token, result) => self.session.apply_sidebar(token, result),
            Completion::History(token, peer, result) => {
                self.session.apply_history(token, &peer, result)
            }
            Completion::Sent(peer, result) => self.session.apply_sent(&peer, result),
            Completion::MarkSeen(message_id, result) => {
                self.session.apply_mark_seen(message_id, result);
                Vec::new()
            }
        };
        self.perform(effects);
    }

    /// Starts a request task per effect; notices go straight to the UI.
    fn perform(&self, effects: Vec<Effect>) {
        for effect in effects {
            let api = Arc::clone(&self.api);
            let done = self.completions_tx.clone();
            match effect {
                Effect::FetchSidebar { token } => {
                    tokio::spawn(async move {
                        let result = api.sidebar().await;
                        let _ = done.send(Completion::Sidebar(token, result));
                    });
                }
                Effect::FetchHistory { token, peer } => {
                    tokio::spawn(async move {
                        let result = api.history(&peer).await;
                        let _ = done.send(Completion::History(token, peer, result));
                    });
                }
                Effect::Send { peer, body } => {
                    tokio::spawn(async move {
                        let result = api.send(&peer, &body).await;
                        let _ = done.send(Completion::Sent(peer, result));
                    });
                }
                Effect::MarkSeen { message_id } => {
                    tokio::spawn(async move {
                        let result = api.mark_seen(message_id).await;
                        let _ = done.send(Completion::MarkSeen(message_id, result));
                    });
                }
                Effect::Notify(notice) => {
                    let _ = self.notices.send(DriverNotice::Session(notice));
                }
            }
        }
    }
}

impl DriverHandle {
    /// Queues a command.
    ///
    /// # Errors
    ///
    /// [`DriverClosed`] if the driver has stopped.
    pub async fn dispatch(&self, command: SessionCommand) -> Result<(), DriverClosed> {
        self.commands.send(command).await.map_err(|_| DriverClosed)
    }

    /// The latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that observes every published snapshot.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until a snapshot satisfies `predicate` and returns it.
    ///
    /// # Errors
    ///
    /// [`DriverClosed`] if the driver stops first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, DriverClosed> {
        self.snapshots
            .wait_for(|s| predicate(s))
            .await
            .map(|s| s.clone())
            .map_err(|_| DriverClosed)
    }

    /// Next notice, or `None` once the driver has stopped.
    pub async fn next_notice(&mut self) -> Option<DriverNotice> {
        self.notices.recv().await
    }

    /// Asks the driver to stop and waits for it.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "session driver task failed");
        }
    }
}
