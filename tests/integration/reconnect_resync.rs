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

//! Integration tests for reconnecting and re-syncing unseen counts.
//!
//! Pushes sent while a client is offline are lost by design; the client
//! must recover them from the sidebar it fetches after reconnecting.
//!
//! These tests validate:
//! - Messages sent during a disconnect are counted exactly once afterwards
//! - An open conversation is closed by a reconnect
//! - Messages sent across the whole reconnect window are neither lost nor
//!   double counted
//!
//! ## Disconnect simulation
//!
//! The server's `close_all` sends a close frame on every push channel,
//! which the client sees as a dropped connection and retries with backoff.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quickchat::api::HttpChatApi;
use quickchat::channel::PushChannel;
use quickchat::config::{ClientConfig, ReconnectConfig};
use quickchat::driver::{DriverHandle, SessionCommand, SessionDriver};
use quickchat::session::{SessionSnapshot, SessionState};
use quickchat_proto::message::{MessageBody, UserId};
use quickchat_server::config::UserEntry;
use quickchat_server::delivery::DeliveryCoordinator;
use quickchat_server::directory::UserDirectory;
use quickchat_server::routes::{self, AppState};
use quickchat_server::store::InMemoryStore;

// =============================================================================
// Helpers
// =============================================================================

const TIMEOUT: Duration = Duration::from_secs(10);

fn uid(id: &str) -> UserId {
    UserId::new(id)
}

async fn start_server() -> (SocketAddr, AppState<InMemoryStore>) {
    let entries: Vec<_> = ["alice", "bob", "carol"]
        .iter()
        .map(|id| UserEntry {
            id: (*id).to_string(),
            full_name: id.to_uppercase(),
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

/// Spawns bob's client. `initial_backoff` controls how long the client
/// stays offline after a drop.
async fn connect_bob(addr: SocketAddr, initial_backoff: Duration) -> (DriverHandle, PushChannel) {
    let config = ClientConfig {
        server_url: format!("http://{addr}"),
        token: Some("tok-bob".to_string()),
        reconnect: ReconnectConfig {
            initial_backoff,
            max_backoff: initial_backoff * 4,
        },
        ..ClientConfig::default()
    };
    let api = Arc::new(HttpChatApi::new(config.base_url().unwrap(), "tok-bob"));
    let channel = PushChannel::spawn(config.channel_config().unwrap());
    let events = channel.subscribe().unwrap();
    let mut handle = SessionDriver::spawn(api, events, 64);
    wait_for(&mut handle, |s| s.state == SessionState::Idle && s.counts_trusted).await;
    (handle, channel)
}

async fn wait_for(
    handle: &mut DriverHandle,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(TIMEOUT, handle.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("driver stopped")
}

fn resynced(snapshot: &SessionSnapshot) -> bool {
    snapshot.state != SessionState::Disconnected && snapshot.counts_trusted
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn messages_sent_while_offline_are_counted_after_reconnect() {
    let (addr, state) = start_server().await;
    let (mut bob, channel) = connect_bob(addr, Duration::from_millis(300)).await;

    state.connections().close_all().await;
    wait_for(&mut bob, |s| s.state == SessionState::Disconnected).await;

    for text in ["are", "you", "there"] {
        state
            .send(&uid("alice"), &uid("bob"), MessageBody::text(text))
            .await
            .unwrap();
    }

    let snap = wait_for(&mut bob, |s| resynced(s) && s.unseen.get(&uid("alice")) == 3).await;
    assert_eq!(snap.unseen.total(), 3);

    // Nothing arrives later to inflate the count.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bob.snapshot().unseen.get(&uid("alice")), 3);

    bob.shutdown().await;
    channel.shutdown();
}

#[tokio::test]
async fn reconnect_closes_the_open_conversation() {
    let (addr, state) = start_server().await;
    let (mut bob, channel) = connect_bob(addr, Duration::from_millis(300)).await;

    bob.dispatch(SessionCommand::SelectPeer(uid("alice")))
        .await
        .unwrap();
    wait_for(&mut bob, |s| s.view.is_some()).await;

    state.connections().close_all().await;
    wait_for(&mut bob, |s| s.state == SessionState::Disconnected).await;
    state
        .send(&uid("alice"), &uid("bob"), MessageBody::text("missed"))
        .await
        .unwrap();

    let snap = wait_for(&mut bob, |s| resynced(s) && s.unseen.get(&uid("alice")) == 1).await;
    assert!(snap.view.is_none());
    assert_eq!(snap.state, SessionState::Idle);

    bob.shutdown().await;
    channel.shutdown();
}

#[tokio::test]
async fn steady_traffic_across_a_reconnect_is_counted_exactly_once() {
    let (addr, state) = start_server().await;
    let (mut bob, channel) = connect_bob(addr, Duration::from_millis(20)).await;

    let sender_state = Arc::clone(&state);
    let traffic = tokio::spawn(async move {
        for i in 0..30 {
            let sender = if i % 2 == 0 { "alice" } else { "carol" };
            sender_state
                .send(&uid(sender), &uid("bob"), MessageBody::text(format!("msg {i}")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    state.connections().close_all().await;
    traffic.await.unwrap();

    let snap = wait_for(&mut bob, |s| resynced(s) && s.unseen.total() == 30).await;
    assert_eq!(snap.unseen.get(&uid("alice")), 15);
    assert_eq!(snap.unseen.get(&uid("carol")), 15);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bob.snapshot().unseen.total(), 30);

    bob.shutdown().await;
    channel.shutdown();
}
