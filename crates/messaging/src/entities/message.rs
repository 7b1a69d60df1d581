use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserRef;
use crate::types::{ConversationId, MessageId, MessagingError, MessagingResult, UserId};

const MAX_CONTENT_LEN: usize = 100_000;

/// Represents a message within a conversation.
///
/// Once observed, `content`, `sender` and `created_at` never change; only
/// `read_by` grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: MessageId,
    #[serde(alias = "conversation", default)]
    pub conversation_id: ConversationId,
    pub sender: UserRef,
    pub content: String,
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

/// Whether the backend has confirmed a message yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryState {
    /// Optimistic local copy waiting for its server echo
    Sending,
    #[default]
    Delivered,
}

impl Message {
    /// Create an optimistic local message with a placeholder identity
    pub fn local(
        placeholder_id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        sender: UserRef,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut read_by = BTreeSet::new();
        read_by.insert(sender.id.clone());
        Self {
            id: placeholder_id.into(),
            conversation_id: conversation_id.into(),
            sender,
            content: content.into(),
            read_by,
            created_at: now,
            updated_at: now,
            delivery: DeliveryState::Sending,
        }
    }

    /// Ordering key within a conversation: `created_at`, then `id`
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Sending
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.contains(user_id)
    }

    /// Add one reader. Returns `true` when the set grew.
    pub fn mark_read_by(&mut self, user_id: impl Into<UserId>) -> bool {
        self.read_by.insert(user_id.into())
    }

    /// Union another reader set into this one. Returns `true` when it grew.
    pub fn merge_read_by(&mut self, readers: &BTreeSet<UserId>) -> bool {
        let before = self.read_by.len();
        self.read_by.extend(readers.iter().cloned());
        self.read_by.len() > before
    }

    /// Every participant other than the sender has read this message
    pub fn seen_by_recipients(&self, participants: &[UserRef]) -> bool {
        let mut recipients = participants
            .iter()
            .filter(|p| p.id != self.sender.id)
            .peekable();
        if recipients.peek().is_none() {
            return false;
        }
        recipients.all(|p| self.read_by.contains(&p.id))
    }

    /// Reject records from the wire that cannot be keyed: a message needs its
    /// own id, its sender's id and its conversation id.
    pub fn validate_identity(&self) -> MessagingResult<()> {
        if self.id.trim().is_empty() {
            return Err(MessagingError::validation("Message id cannot be empty"));
        }
        if self.sender.id.trim().is_empty() {
            return Err(MessagingError::validation("Message sender id cannot be empty"));
        }
        if self.conversation_id.trim().is_empty() {
            return Err(MessagingError::validation(
                "Message conversation id cannot be empty",
            ));
        }
        Ok(())
    }

    /// Validate user-supplied content before an optimistic send
    pub fn validate_content(content: &str) -> MessagingResult<()> {
        if content.trim().is_empty() {
            return Err(MessagingError::validation("Message content cannot be empty"));
        }

        if content.len() > MAX_CONTENT_LEN {
            return Err(MessagingError::validation(
                "Message content too long (max 100,000 characters)",
            ));
        }

        Ok(())
    }
}
