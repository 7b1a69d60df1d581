use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Immutable snapshot of a user attached to a message or conversation.
///
/// Captured when the record was observed; never live-updated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(alias = "_id")]
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

impl UserRef {
    pub fn new(
        id: impl Into<UserId>,
        name: impl Into<String>,
        email: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            role: role.into(),
        }
    }

    /// Case-insensitive match against name or email
    pub fn matches(&self, query_lowercase: &str) -> bool {
        self.name.to_lowercase().contains(query_lowercase)
            || self.email.to_lowercase().contains(query_lowercase)
    }
}
