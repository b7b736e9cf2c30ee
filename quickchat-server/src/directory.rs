//! Registered users and bearer-token lookup.
//!
//! Users are issued outside this system; the directory only answers "does
//! this user exist" and "which user does this token belong to".

use std::collections::HashMap;

use quickchat_proto::api::UserSummary;
use quickchat_proto::message::UserId;

use crate::config::UserEntry;

/// Immutable set of registered users.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<UserId, UserSummary>,
    tokens: HashMap<String, UserId>,
}

impl UserDirectory {
    /// Builds a directory from configured user entries.
    #[must_use]
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let mut directory = Self::default();
        for entry in entries {
            directory.add(
                UserSummary {
                    id: UserId::new(&entry.id),
                    full_name: entry.full_name.clone(),
                    bio: entry.bio.clone(),
                },
                &entry.token,
            );
        }
        directory
    }

    /// Registers a user authenticated by `token`.
    pub fn add(&mut self, user: UserSummary, token: &str) {
        self.tokens.insert(token.to_string(), user.id.clone());
        self.users.insert(user.id.clone(), user);
    }

    /// Resolves a bearer token to its user.
    #[must_use]
    pub fn authenticate(&self, token: &str) -> Option<&UserId> {
        self.tokens.get(token)
    }

    /// Whether `id` is a registered user.
    #[must_use]
    pub fn contains(&self, id: &UserId) -> bool {
        self.users.contains_key(id)
    }

    /// Every user except `me`, sorted by id.
    #[must_use]
    pub fn peers_of(&self, me: &UserId) -> Vec<UserSummary> {
        let mut peers: Vec<_> = self
            .users
            .values()
            .filter(|u| &u.id != me)
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }
}
