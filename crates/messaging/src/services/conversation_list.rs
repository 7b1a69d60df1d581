//! Conversation summaries, most recently active first.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::message_store::MessageStore;
use super::presence::PresenceTracker;
use super::receipts::ReadReceiptReconciler;
use crate::entities::{Conversation, Message};
use crate::types::{ConversationId, MessagingResult};

/// One row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub unread_count: usize,
    pub is_other_online: bool,
}

/// Known conversations. Summaries are derived on every read, so they always
/// reflect the current store, receipts and presence.
#[derive(Debug, Default)]
pub struct ConversationList {
    conversations: HashMap<ConversationId, Conversation>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load from the history collaborator. Invalid snapshots are
    /// skipped. Returns how many were accepted.
    pub fn seed(&mut self, conversations: Vec<Conversation>) -> usize {
        let mut accepted = 0;
        for conversation in conversations {
            match self.upsert(conversation) {
                Ok(()) => accepted += 1,
                Err(error) => warn!(%error, "skipping conversation snapshot"),
            }
        }
        debug!(accepted, "conversation list seeded");
        accepted
    }

    /// Insert a snapshot, or merge it into the known conversation
    pub fn upsert(&mut self, mut conversation: Conversation) -> MessagingResult<()> {
        conversation.normalize()?;
        match self.conversations.get_mut(&conversation.id) {
            Some(existing) => existing.merge_snapshot(conversation),
            None => {
                self.conversations
                    .insert(conversation.id.clone(), conversation);
            }
        }
        Ok(())
    }

    /// Fold a message into its conversation's preview. Messages for
    /// conversations not seeded yet are ignored.
    pub fn record_message(&mut self, message: &Message) -> bool {
        match self.conversations.get_mut(&message.conversation_id) {
            Some(conversation) => conversation.record_message(message),
            None => {
                debug!(
                    conversation_id = %message.conversation_id,
                    "message for unknown conversation not added to list"
                );
                false
            }
        }
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.conversations.contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn summaries(
        &self,
        store: &MessageStore,
        receipts: &ReadReceiptReconciler,
        presence: &PresenceTracker,
    ) -> Vec<ConversationSummary> {
        let current_user_id = receipts.current_user_id();
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .values()
            .map(|conversation| {
                let mut conversation = conversation.clone();
                if let Some(latest) = store.latest(&conversation.id) {
                    conversation.record_message(latest);
                }
                let is_other_online = conversation
                    .other_participant(current_user_id)
                    .map_or(false, |other| presence.is_online(&other.id));
                ConversationSummary {
                    unread_count: receipts.unread_count(&conversation.id),
                    is_other_online,
                    conversation,
                }
            })
            .collect();

        summaries.sort_by(most_recent_first);
        summaries
    }

    /// Summaries whose other participant's name or email, or last message,
    /// contains `query` (case-insensitive). A blank query matches all.
    pub fn search(
        &self,
        query: &str,
        store: &MessageStore,
        receipts: &ReadReceiptReconciler,
        presence: &PresenceTracker,
    ) -> Vec<ConversationSummary> {
        let query = query.trim().to_lowercase();
        let current_user_id = receipts.current_user_id().to_string();
        let mut summaries = self.summaries(store, receipts, presence);
        if query.is_empty() {
            return summaries;
        }

        summaries.retain(|summary| {
            let conversation = &summary.conversation;
            let participant_matches = conversation
                .other_participant(&current_user_id)
                .map_or(false, |other| other.matches(&query));
            let preview_matches = conversation
                .last_message
                .as_ref()
                .map_or(false, |last| last.content.to_lowercase().contains(&query));
            participant_matches || preview_matches
        });
        summaries
    }
}

fn most_recent_first(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    b.conversation
        .updated_at
        .cmp(&a.conversation.updated_at)
        .then_with(|| a.conversation.id.cmp(&b.conversation.id))
}
