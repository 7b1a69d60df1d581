//! Online/offline tracking from presence broadcasts.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::types::UserId;

/// Most recent presence state observed for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub online: bool,
}

/// Last-event-wins map of user id to online flag.
///
/// Events carry no timestamp, so arrival order decides. Nothing here ever
/// fails: blank identifiers are dropped.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    users: HashMap<UserId, bool>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_online(&mut self, user_id: &str) {
        self.apply(user_id, true);
    }

    pub fn apply_offline(&mut self, user_id: &str) {
        self.apply(user_id, false);
    }

    fn apply(&mut self, user_id: &str, online: bool) {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            debug!(online, "dropping presence event without a user id");
            return;
        }
        self.users.insert(user_id.to_string(), online);
    }

    /// Unknown users are offline
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).copied().unwrap_or(false)
    }

    pub fn online_users(&self) -> BTreeSet<UserId> {
        self.users
            .iter()
            .filter(|(_, online)| **online)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self
            .users
            .iter()
            .map(|(user_id, online)| PresenceEntry {
                user_id: user_id.clone(),
                online: *online,
            })
            .collect();
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
