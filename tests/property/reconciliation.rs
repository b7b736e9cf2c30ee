#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

//! Property-based tests for client-side unseen-count reconciliation.
//!
//! Uses proptest to verify:
//! 1. Pushes into the open conversation keep it ordered and duplicate-free
//!    and never create an unseen entry for that peer.
//! 2. Pushes from other peers are counted exactly, per sender.
//! 3. Pushes landing before or after a sidebar reply are merged with the
//!    fetched counts without loss or double counting, for any watermark.
//! 4. Opening a conversation keeps its buffered pushes out of the next
//!    sidebar merge.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use quickchat::session::{Effect, RequestToken, Session};
use quickchat_proto::api::SidebarPayload;
use quickchat_proto::message::{Message, MessageBody, MessageId, Timestamp, UserId};

const PEERS: [&str; 3] = ["alice", "carol", "dave"];

fn uid(id: &str) -> UserId {
    UserId::new(id)
}

fn message(id: u64, from: &str) -> Message {
    Message {
        id: MessageId::from_raw(id),
        sender_id: uid(from),
        recipient_id: uid("bob"),
        body: MessageBody::text(format!("message {id}")),
        created_at: Timestamp::from_millis(1_700_000_000_000 + id),
        seen: false,
    }
}

fn sidebar_token(effects: &[Effect]) -> RequestToken {
    effects
        .iter()
        .find_map(|e| match e {
            Effect::FetchSidebar { token } => Some(*token),
            _ => None,
        })
        .expect("no sidebar fetch issued")
}

fn history_token(effects: &[Effect]) -> RequestToken {
    effects
        .iter()
        .find_map(|e| match e {
            Effect::FetchHistory { token, .. } => Some(*token),
            _ => None,
        })
        .expect("no history fetch issued")
}

fn empty_sidebar() -> SidebarPayload {
    SidebarPayload {
        users: Vec::new(),
        unseen_messages: BTreeMap::new(),
        watermark: None,
    }
}

/// A session connected as bob with trusted, empty counts.
fn connected_session() -> Session {
    let mut session = Session::new();
    let token = sidebar_token(&session.on_connected(uid("bob")));
    session.apply_sidebar(token, Ok(empty_sidebar()));
    session
}

fn open(session: &mut Session, peer: &str) {
    let token = history_token(&session.select_peer(uid(peer)).unwrap());
    session.apply_history(token, &uid(peer), Ok(Vec::new()));
}

/// Per-sender counts over `messages`.
fn count_by_sender<'a>(messages: impl IntoIterator<Item = &'a Message>) -> BTreeMap<UserId, u32> {
    let mut counts = BTreeMap::new();
    for m in messages {
        *counts.entry(m.sender_id.clone()).or_insert(0) += 1;
    }
    counts
}

/// Strategy for a sequence of distinct message ids with a sender each.
fn arb_traffic(max: usize) -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(0..PEERS.len(), 1..max).prop_map(|senders| {
        senders
            .into_iter()
            .enumerate()
            .map(|(i, s)| message(i as u64 + 1, PEERS[s]))
            .collect()
    })
}

proptest! {
    #[test]
    fn open_conversation_stays_ordered_and_uncounted(
        ids in prop::collection::vec(1_u64..200, 1..60),
    ) {
        let mut session = connected_session();
        open(&mut session, "alice");

        let mut seen = BTreeSet::new();
        for id in &ids {
            let effects = session.receive_push(message(*id, "alice"));
            if seen.insert(*id) {
                prop_assert_eq!(effects, vec![Effect::MarkSeen { message_id: MessageId::from_raw(*id) }]);
            } else {
                prop_assert!(effects.is_empty());
            }
        }

        let view = session.view().expect("conversation open");
        let shown: Vec<u64> = view.messages().iter().map(|m| m.id.as_raw()).collect();
        let expected: Vec<u64> = seen.into_iter().collect();
        prop_assert_eq!(shown, expected);
        prop_assert_eq!(session.unseen().get(&uid("alice")), 0);
        prop_assert!(session.unseen().is_empty());
    }

    #[test]
    fn pushes_from_other_peers_are_counted_exactly(
        traffic in arb_traffic(80),
        viewing_someone_else in any::<bool>(),
    ) {
        let mut session = connected_session();
        if viewing_someone_else {
            open(&mut session, "erin");
        }

        for m in &traffic {
            prop_assert!(session.receive_push(m.clone()).is_empty());
        }

        let expected = count_by_sender(&traffic);
        for peer in PEERS {
            prop_assert_eq!(
                session.unseen().get(&uid(peer)),
                expected.get(&uid(peer)).copied().unwrap_or(0)
            );
        }
        prop_assert_eq!(session.unseen().total() as usize, traffic.len());
        if viewing_someone_else {
            prop_assert!(session.view().expect("view").is_empty());
        }
    }

    #[test]
    fn replay_merges_with_fetched_counts(
        traffic in arb_traffic(60),
        watermark_frac in 0.0_f64..=1.0,
        registered_frac in 0.0_f64..=1.0,
        late in prop::collection::vec(any::<bool>(), 60),
    ) {
        let total = traffic.len() as u64;
        // Store state when the sidebar was read.
        let watermark = (watermark_frac * total as f64).floor() as u64;
        // Pushes received since the channel came up; always starts at or
        // before the watermark because registration precedes the read.
        let registered_at = (registered_frac * watermark as f64).floor() as u64;

        let mut session = Session::new();
        let token = sidebar_token(&session.on_connected(uid("bob")));

        // Each pushed message lands either before the sidebar reply or after it.
        let (after, before): (Vec<&Message>, Vec<&Message>) = traffic
            .iter()
            .filter(|m| m.id.as_raw() > registered_at)
            .partition(|m| late[(m.id.as_raw() - 1) as usize]);
        for m in before {
            session.receive_push(m.clone());
        }

        let fetched = count_by_sender(traffic.iter().filter(|m| m.id.as_raw() <= watermark));
        session.apply_sidebar(token, Ok(SidebarPayload {
            users: Vec::new(),
            unseen_messages: fetched,
            watermark: (watermark > 0).then_some(MessageId::from_raw(watermark)),
        }));
        for m in after {
            session.receive_push(m.clone());
        }

        prop_assert!(session.counts_trusted());
        let expected = count_by_sender(&traffic);
        for peer in PEERS {
            prop_assert_eq!(
                session.unseen().get(&uid(peer)),
                expected.get(&uid(peer)).copied().unwrap_or(0)
            );
        }
        prop_assert_eq!(u64::from(session.unseen().total()), total);
    }

    #[test]
    fn opened_conversation_is_not_revived_by_sidebar(
        traffic in arb_traffic(40),
        open_idx in 0..PEERS.len(),
    ) {
        let opened = PEERS[open_idx];
        let mut session = Session::new();
        let token = sidebar_token(&session.on_connected(uid("bob")));
        for m in &traffic {
            session.receive_push(m.clone());
        }

        // Opening marks everything from `opened` seen; then the user moves on.
        open(&mut session, opened);
        open(&mut session, "erin");

        let unseen_after_open = traffic.iter().filter(|m| m.sender_id != uid(opened));
        session.apply_sidebar(token, Ok(SidebarPayload {
            users: Vec::new(),
            unseen_messages: BTreeMap::new(),
            watermark: None,
        }));

        prop_assert_eq!(session.unseen().get(&uid(opened)), 0);
        prop_assert_eq!(session.unseen().total() as usize, unseen_after_open.count());
    }
}
