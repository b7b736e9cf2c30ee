//! Client-side unseen-message counts, one entry per peer.

use std::collections::BTreeMap;

use quickchat_proto::message::UserId;

/// Unseen-message count per peer.
///
/// An entry exists only while its count is non-zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnseenMap {
    counts: BTreeMap<UserId, u32>,
}

impl UnseenMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count for `peer`, zero when absent.
    #[must_use]
    pub fn get(&self, peer: &UserId) -> u32 {
        self.counts.get(peer).copied().unwrap_or(0)
    }

    /// Adds one unseen message from `peer` and returns the new count.
    pub fn increment(&mut self, peer: &UserId) -> u32 {
        let count = self.counts.entry(peer.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Drops `peer`'s entry, returning the count it had.
    pub fn clear(&mut self, peer: &UserId) -> u32 {
        self.counts.remove(peer).unwrap_or(0)
    }

    /// Replaces every count with a server snapshot.
    ///
    /// Zero counts are not stored, and `except` (the conversation currently
    /// open, whose messages are being marked seen) is left out.
    pub fn replace(&mut self, counts: BTreeMap<UserId, u32>, except: Option<&UserId>) {
        self.counts = counts
            .into_iter()
            .filter(|(peer, count)| *count > 0 && Some(peer) != except)
            .collect();
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts.values().fold(0, |acc, c| acc.saturating_add(*c))
    }

    /// Peers with unseen messages, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, u32)> {
        self.counts.iter().map(|(peer, count)| (peer, *count))
    }

    /// Number of peers with unseen messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether nothing is unseen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
