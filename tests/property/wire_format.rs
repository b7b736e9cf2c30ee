// Test-specific lint overrides: property tests use unwrap freely.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based tests for the `QuickChat` wire format.
//!
//! Uses proptest to verify:
//! 1. Any message survives a push-event encode → decode cycle unchanged.
//! 2. Arbitrary bytes never cause a panic in reply or event decoding.
//! 3. A sidebar reply keeps every unseen count it was built with.

use std::collections::BTreeMap;

use proptest::prelude::*;
use quickchat_proto::api::{self, SidebarPayload, Success};
use quickchat_proto::event::{self, ServerEvent};
use quickchat_proto::message::{Message, MessageBody, MessageId, Timestamp, UserId};

/// Strategy for generating user identifiers.
fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-z0-9_-]{1,24}".prop_map(UserId::new)
}

/// Strategy for generating non-empty message bodies.
fn arb_body() -> impl Strategy<Value = MessageBody> {
    prop_oneof![
        "[^\x00]{1,256}".prop_map(MessageBody::text),
        "https://cdn\\.example/[a-z0-9]{1,16}\\.png".prop_map(MessageBody::image),
        ("[^\x00]{1,64}", "https://cdn\\.example/[a-z]{1,8}").prop_map(|(t, i)| MessageBody {
            text: Some(t),
            image: Some(i),
        }),
    ]
}

/// Strategy for generating persisted messages.
fn arb_message() -> impl Strategy<Value = Message> {
    (
        any::<u64>(),
        arb_user_id(),
        arb_user_id(),
        arb_body(),
        any::<u64>(),
        any::<bool>(),
    )
        .prop_map(|(id, sender, recipient, body, at, seen)| Message {
            id: MessageId::from_raw(id),
            sender_id: sender,
            recipient_id: recipient,
            body,
            created_at: Timestamp::from_millis(at),
            seen,
        })
}

proptest! {
    #[test]
    fn pushed_message_survives_codec(message in arb_message()) {
        let event = ServerEvent::NewMessage { message };
        let text = event::encode(&event).unwrap();
        prop_assert_eq!(event::decode(&text).unwrap(), event);
    }

    #[test]
    fn random_bytes_never_panic_reply_decoding(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = api::decode_reply::<SidebarPayload>(&bytes);
    }

    #[test]
    fn random_text_never_panics_event_decoding(text in ".{0,256}") {
        let _ = event::decode(&text);
    }

    #[test]
    fn sidebar_counts_survive_reply(counts in prop::collection::btree_map(arb_user_id(), 1u32..1000, 0..16)) {
        let payload = SidebarPayload {
            users: vec![],
            unseen_messages: counts.clone(),
            watermark: None,
        };
        let bytes = serde_json::to_vec(&Success::new(payload)).unwrap();
        let decoded: SidebarPayload = api::decode_reply(&bytes).unwrap();
        let expected: BTreeMap<UserId, u32> = counts;
        prop_assert_eq!(decoded.unseen_messages, expected);
    }
}
