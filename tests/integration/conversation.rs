// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! End-to-end conversation tests: a real delivery server and real clients.
//!
//! These tests validate:
//! - A message sent by one user reaches the other live and bumps their
//!   unseen count while that conversation is closed
//! - Opening a conversation clears the count locally and on the server
//! - Pushes into the open conversation are appended and acknowledged
//! - A history reply for a conversation the user already left is discarded
//! - Marking seen is idempotent and an expired token ends the session

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quickchat::api::{ChatApi, HttpChatApi};
use quickchat::channel::PushChannel;
use quickchat::config::{ClientConfig, ReconnectConfig};
use quickchat::driver::{DriverHandle, DriverNotice, SessionCommand, SessionDriver};
use quickchat::session::{LoadState, Notice, SessionSnapshot, SessionState};
use quickchat_proto::message::{MessageBody, UserId};
use quickchat_server::config::UserEntry;
use quickchat_server::delivery::DeliveryCoordinator;
use quickchat_server::directory::UserDirectory;
use quickchat_server::routes::{self, AppState};
use quickchat_server::store::{InMemoryStore, MessageStore};

// =============================================================================
// Helpers
// =============================================================================

const TIMEOUT: Duration = Duration::from_secs(5);

fn uid(id: &str) -> UserId {
    UserId::new(id)
}

/// Starts a server for alice, bob and carol on an OS-assigned port.
async fn start_server() -> (SocketAddr, AppState<InMemoryStore>) {
    let entries: Vec<_> = [
        ("alice", "Alice Liddell"),
        ("bob", "Bob Marley"),
        ("carol", "Carol King"),
    ]
    .iter()
    .map(|(id, name)| UserEntry {
        id: (*id).to_string(),
        full_name: (*name).to_string(),
        bio: None,
        token: format!("tok-{id}"),
    })
    .collect();
    let state = Arc::new(DeliveryCoordinator::new(
        InMemoryStore::new(),
        UserDirectory::from_entries(&entries),
    ));
    let (addr, _handle) = routes::start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (addr, state)
}

fn client_config(addr: SocketAddr, token: &str) -> ClientConfig {
    ClientConfig {
        server_url: format!("http://{addr}"),
        token: Some(token.to_string()),
        reconnect: ReconnectConfig {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
        },
        ..ClientConfig::default()
    }
}

/// A running client: driver, push channel and the API it talks through.
struct Client {
    handle: DriverHandle,
    channel: PushChannel,
    api: Arc<HttpChatApi>,
}

impl Client {
    fn spawn(addr: SocketAddr, token: &str) -> Self {
        let config = client_config(addr, token);
        let api = Arc::new(HttpChatApi::new(config.base_url().unwrap(), token));
        let channel = PushChannel::spawn(config.channel_config().unwrap());
        let events = channel.subscribe().unwrap();
        let handle = SessionDriver::spawn(Arc::clone(&api), events, 64);
        Self {
            handle,
            channel,
            api,
        }
    }

    /// Spawns a client for `user` and waits until its counts are trusted.
    async fn connect(addr: SocketAddr, user: &str) -> Self {
        let mut client = Self::spawn(addr, &format!("tok-{user}"));
        client
            .wait_for(|s| s.state == SessionState::Idle && s.counts_trusted)
            .await;
        client
    }

    async fn wait_for(
        &mut self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        tokio::time::timeout(TIMEOUT, self.handle.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("driver stopped")
    }

    async fn open(&mut self, peer: &str) -> SessionSnapshot {
        self.handle
            .dispatch(SessionCommand::SelectPeer(uid(peer)))
            .await
            .unwrap();
        self.wait_for(|s| view_ready(s, peer)).await
    }

    async fn say(&self, text: &str) {
        self.handle
            .dispatch(SessionCommand::Send(MessageBody::text(text)))
            .await
            .unwrap();
    }

    async fn close(self) {
        self.handle.shutdown().await;
        self.channel.shutdown();
    }
}

fn view_ready(snapshot: &SessionSnapshot, peer: &str) -> bool {
    snapshot
        .view
        .as_ref()
        .is_some_and(|v| v.peer().as_str() == peer && v.state() == LoadState::Ready)
}

fn texts(snapshot: &SessionSnapshot) -> Vec<String> {
    snapshot
        .view
        .as_ref()
        .map(|v| {
            v.messages()
                .iter()
                .filter_map(|m| m.body.text.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Polls the server until `recipient` has no unseen messages.
async fn wait_server_unseen_cleared(state: &AppState<InMemoryStore>, recipient: &UserId) {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let snapshot = state.store().unseen_counts(recipient).await.unwrap();
            if snapshot.counts.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("server still reports unseen messages");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn hi_and_there_reconcile_on_both_sides() {
    let (addr, state) = start_server().await;
    let mut alice = Client::connect(addr, "alice").await;
    let mut bob = Client::connect(addr, "bob").await;

    alice.open("bob").await;
    alice.say("hi").await;
    alice.wait_for(|s| texts(s) == ["hi"]).await;

    // Bob has no conversation open, so "hi" only shows as a count.
    let snap = bob.wait_for(|s| s.unseen.get(&uid("alice")) == 1).await;
    assert!(snap.view.is_none());
    assert_eq!(snap.unseen.total(), 1);

    let snap = bob.open("alice").await;
    assert_eq!(texts(&snap), ["hi"]);
    assert_eq!(snap.unseen.get(&uid("alice")), 0);
    wait_server_unseen_cleared(&state, &uid("bob")).await;

    bob.say("there").await;
    bob.wait_for(|s| texts(s) == ["hi", "there"]).await;

    // Alice has bob open: the push is appended, never counted.
    let snap = alice.wait_for(|s| texts(s) == ["hi", "there"]).await;
    assert!(snap.unseen.is_empty());
    wait_server_unseen_cleared(&state, &uid("alice")).await;

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn sidebar_lists_peers_and_existing_counts() {
    let (addr, state) = start_server().await;
    for text in ["one", "two", "three"] {
        state
            .send(&uid("carol"), &uid("bob"), MessageBody::text(text))
            .await
            .unwrap();
    }

    let bob = Client::connect(addr, "bob").await;
    let snap = bob.handle.snapshot();
    let ids: Vec<_> = snap.users.iter().map(|u| u.id.as_str().to_string()).collect();
    assert_eq!(ids, ["alice", "carol"]);
    assert_eq!(snap.unseen.get(&uid("carol")), 3);
    assert_eq!(snap.me, Some(uid("bob")));

    bob.close().await;
}

#[tokio::test]
async fn pushes_from_other_peers_count_while_a_conversation_is_open() {
    let (addr, state) = start_server().await;
    let mut bob = Client::connect(addr, "bob").await;
    bob.open("carol").await;

    state
        .send(&uid("alice"), &uid("bob"), MessageBody::text("ping"))
        .await
        .unwrap();
    state
        .send(&uid("alice"), &uid("bob"), MessageBody::text("ping again"))
        .await
        .unwrap();

    let snap = bob.wait_for(|s| s.unseen.get(&uid("alice")) == 2).await;
    assert!(texts(&snap).is_empty());
    assert_eq!(snap.state, SessionState::Viewing(uid("carol")));

    bob.close().await;
}

#[tokio::test]
async fn switching_quickly_shows_only_the_last_conversation() {
    let (addr, state) = start_server().await;
    state
        .send(&uid("alice"), &uid("bob"), MessageBody::text("from alice"))
        .await
        .unwrap();
    state
        .send(&uid("carol"), &uid("bob"), MessageBody::text("from carol"))
        .await
        .unwrap();

    let mut bob = Client::connect(addr, "bob").await;
    bob.handle
        .dispatch(SessionCommand::SelectPeer(uid("alice")))
        .await
        .unwrap();
    let snap = bob.open("carol").await;
    assert_eq!(texts(&snap), ["from carol"]);

    // A late alice reply must not replace the carol view.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snap = bob.handle.snapshot();
    assert!(view_ready(&snap, "carol"));
    assert_eq!(texts(&snap), ["from carol"]);
    assert!(snap.unseen.is_empty());

    bob.close().await;
}

#[tokio::test]
async fn mark_seen_is_idempotent_over_http() {
    let (addr, state) = start_server().await;
    let sent = state
        .send(&uid("alice"), &uid("bob"), MessageBody::text("hello"))
        .await
        .unwrap();
    let bob = Client::connect(addr, "bob").await;

    let first = bob.api.mark_seen(sent.id).await.unwrap();
    assert!(first.newly_marked);
    let second = bob.api.mark_seen(sent.id).await.unwrap();
    assert!(!second.newly_marked);
    assert_eq!(second.message_id, sent.id);

    let sidebar = bob.api.sidebar().await.unwrap();
    assert!(sidebar.unseen_messages.is_empty());

    bob.close().await;
}

#[tokio::test]
async fn unknown_token_expires_the_session() {
    let (addr, _state) = start_server().await;
    let mut mallory = Client::spawn(addr, "tok-mallory");

    let notice = tokio::time::timeout(TIMEOUT, mallory.handle.next_notice())
        .await
        .expect("timed out waiting for notice");
    assert_eq!(notice, Some(DriverNotice::Session(Notice::SessionExpired)));
    assert_eq!(mallory.handle.snapshot().state, SessionState::Disconnected);

    mallory.close().await;
}
