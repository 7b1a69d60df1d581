use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;
use super::user::UserRef;
use crate::types::{ConversationId, MessagingError, MessagingResult, UserId};

/// Represents a conversation as seen by the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: ConversationId,
    /// Participants agreed at creation, unique by id
    pub participants: Vec<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    pub updated_at: DateTime<Utc>,
}

/// Preview of the most recent message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub sender_id: UserId,
    pub timestamp: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation, dropping duplicate participants
    pub fn new(
        id: impl Into<ConversationId>,
        participants: Vec<UserRef>,
        updated_at: DateTime<Utc>,
    ) -> MessagingResult<Self> {
        let mut conversation = Self {
            id: id.into(),
            participants,
            last_message: None,
            updated_at,
        };
        conversation.normalize()?;
        Ok(conversation)
    }

    /// Enforce the participant invariant on a snapshot received from elsewhere
    pub fn normalize(&mut self) -> MessagingResult<()> {
        if self.id.trim().is_empty() {
            return Err(MessagingError::validation("Conversation id cannot be empty"));
        }

        let mut seen = HashSet::new();
        self.participants.retain(|p| seen.insert(p.id.clone()));

        if self.participants.is_empty() {
            return Err(MessagingError::validation(format!(
                "Conversation {} has no participants",
                self.id
            )));
        }

        Ok(())
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.id == user_id)
    }

    /// First participant that is not `current_user_id`
    pub fn other_participant(&self, current_user_id: &str) -> Option<&UserRef> {
        self.participants.iter().find(|p| p.id != current_user_id)
    }

    /// Fold a message into the preview. `updated_at` never moves backwards.
    ///
    /// Returns `true` when the preview changed.
    pub fn record_message(&mut self, message: &Message) -> bool {
        if message.created_at > self.updated_at {
            self.updated_at = message.created_at;
        }

        let newer = self
            .last_message
            .as_ref()
            .map_or(true, |last| message.created_at >= last.timestamp);
        if newer {
            self.last_message = Some(LastMessage {
                content: message.content.clone(),
                sender_id: message.sender.id.clone(),
                timestamp: message.created_at,
            });
        }
        newer
    }

    /// Merge a fresh snapshot of the same conversation, keeping the
    /// participant set agreed at creation.
    pub fn merge_snapshot(&mut self, snapshot: Conversation) {
        if snapshot.updated_at > self.updated_at {
            self.updated_at = snapshot.updated_at;
        }

        if let Some(incoming) = snapshot.last_message {
            let newer = self
                .last_message
                .as_ref()
                .map_or(true, |last| incoming.timestamp >= last.timestamp);
            if newer {
                self.last_message = Some(incoming);
            }
        }
    }
}
