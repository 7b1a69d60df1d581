//! Unread tracking and batched read acknowledgements.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::message_store::MessageStore;
use crate::entities::Message;
use crate::types::{ConversationId, MessageId, OutboundEvent, ReadReceiptPayload, UserId};

/// Unread ids of one conversation in arrival order.
#[derive(Debug, Default)]
struct Unread {
    order: Vec<MessageId>,
    members: HashSet<MessageId>,
}

impl Unread {
    fn insert(&mut self, id: &str) -> bool {
        if !self.members.insert(id.to_string()) {
            return false;
        }
        self.order.push(id.to_string());
        true
    }

    fn remove_all(&mut self, ids: &HashSet<&str>) -> bool {
        let before = self.order.len();
        self.order.retain(|id| !ids.contains(id.as_str()));
        self.members.retain(|id| !ids.contains(id.as_str()));
        self.order.len() < before
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Tracks which messages the current user has not read yet, per
/// conversation, in arrival order.
#[derive(Debug)]
pub struct ReadReceiptReconciler {
    current_user_id: UserId,
    pending: HashMap<ConversationId, Unread>,
}

impl ReadReceiptReconciler {
    pub fn new(current_user_id: impl Into<UserId>) -> Self {
        Self {
            current_user_id: current_user_id.into(),
            pending: HashMap::new(),
        }
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    /// Classify a stored message. Someone else's message the current user
    /// has not read becomes pending; one that is now read leaves the set.
    ///
    /// Returns `true` when the pending set changed.
    pub fn observe(&mut self, message: &Message) -> bool {
        if message.sender.id == self.current_user_id {
            return false;
        }

        if message.is_read_by(&self.current_user_id) {
            return self.forget(&message.conversation_id, &message.id);
        }

        self.pending
            .entry(message.conversation_id.clone())
            .or_default()
            .insert(&message.id)
    }

    fn forget(&mut self, conversation_id: &str, message_id: &str) -> bool {
        let Some(unread) = self.pending.get_mut(conversation_id) else {
            return false;
        };
        if !unread.members.contains(message_id) {
            return false;
        }
        unread.remove_all(&HashSet::from([message_id]));
        if unread.is_empty() {
            self.pending.remove(conversation_id);
        }
        true
    }

    /// Flush the conversation's unread set as one `message.markRead` batch,
    /// marking each message read locally before the server confirms.
    pub fn mark_conversation_viewed(
        &mut self,
        conversation_id: &str,
        store: &mut MessageStore,
    ) -> Option<OutboundEvent> {
        let ids = self.pending.remove(conversation_id)?.order;
        for id in &ids {
            store.mark_read_by(id, &self.current_user_id);
        }
        debug!(conversation_id, count = ids.len(), "conversation viewed");
        Some(OutboundEvent::mark_read(ids))
    }

    /// Merge an inbound receipt into the named messages.
    ///
    /// Returns how many messages gained a reader.
    pub fn apply_read_receipt(
        &mut self,
        receipt: &ReadReceiptPayload,
        store: &mut MessageStore,
    ) -> usize {
        let mut updated = 0;
        for id in &receipt.message_ids {
            if store.mark_read_by(id, &receipt.user_id) {
                updated += 1;
            }
        }

        // Read on another device
        if receipt.user_id == self.current_user_id {
            let read: HashSet<&str> = receipt.message_ids.iter().map(String::as_str).collect();
            self.pending.retain(|_, unread| {
                unread.remove_all(&read);
                !unread.is_empty()
            });
        }

        debug!(user_id = %receipt.user_id, updated, "read receipt applied");
        updated
    }

    pub fn unread_count(&self, conversation_id: &str) -> usize {
        self.pending.get(conversation_id).map_or(0, Unread::len)
    }

    pub fn pending_ids(&self, conversation_id: &str) -> Vec<MessageId> {
        self.pending
            .get(conversation_id)
            .map(|unread| unread.order.clone())
            .unwrap_or_default()
    }
}
