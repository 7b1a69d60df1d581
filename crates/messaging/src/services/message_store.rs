//! Per-conversation message sequences with optimistic-send reconciliation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::entities::{DeliveryState, Message, UserRef};
use crate::types::{ConversationId, MessageId, MessagingResult};

/// What [`MessageStore::apply_remote`] did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New message, inserted in sorted position
    Inserted,
    /// The server echo of a local send took over the placeholder's slot
    ReplacedPlaceholder { placeholder_id: MessageId },
    /// Already present by id; only `read_by` may have grown
    Duplicate { read_by_grew: bool },
}

impl ApplyOutcome {
    pub fn is_new(&self) -> bool {
        !matches!(self, ApplyOutcome::Duplicate { .. })
    }
}

/// Ordered, deduplicated message lists keyed by conversation.
///
/// Confirmed messages are kept sorted by `(created_at, id)`. Optimistic
/// sends sit at the tail with a `tmp-N` id until their echo arrives.
#[derive(Debug, Default)]
pub struct MessageStore {
    conversations: HashMap<ConversationId, Vec<Message>>,
    /// Message id to owning conversation, for receipts that carry ids only
    index: HashMap<MessageId, ConversationId>,
    next_placeholder: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a local send at the tail, visible immediately.
    pub fn append_local_optimistic(
        &mut self,
        conversation_id: &str,
        sender: UserRef,
        content: &str,
        now: DateTime<Utc>,
    ) -> MessagingResult<Message> {
        Message::validate_content(content)?;

        self.next_placeholder += 1;
        let placeholder_id = format!("tmp-{}", self.next_placeholder);
        let message = Message::local(&placeholder_id, conversation_id, sender, content, now);

        self.index
            .insert(placeholder_id.clone(), conversation_id.to_string());
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());

        debug!(conversation_id, placeholder_id, "optimistic message appended");
        Ok(message)
    }

    /// Merge an authoritative message.
    ///
    /// Applying the same message twice leaves the store as applying it once,
    /// apart from the monotonic union of `read_by`.
    pub fn apply_remote(&mut self, mut message: Message) -> ApplyOutcome {
        message.delivery = DeliveryState::Delivered;
        let message_id = message.id.clone();
        let conversation_id = message.conversation_id.clone();
        let list = self.conversations.entry(conversation_id.clone()).or_default();

        if let Some(existing) = list.iter_mut().find(|m| m.id == message_id) {
            let read_by_grew = existing.merge_read_by(&message.read_by);
            debug!(%message_id, read_by_grew, "duplicate message ignored");
            return ApplyOutcome::Duplicate { read_by_grew };
        }

        let placeholder = list.iter().position(|m| {
            m.is_pending() && m.sender.id == message.sender.id && m.content == message.content
        });

        let outcome = match placeholder {
            Some(position) => {
                let previous = std::mem::replace(&mut list[position], message);
                list[position].merge_read_by(&previous.read_by);
                self.index.remove(&previous.id);

                if !in_order_at(list, position) {
                    let confirmed = list.remove(position);
                    insert_sorted(list, confirmed);
                }

                debug!(placeholder_id = %previous.id, %message_id, "placeholder reconciled");
                ApplyOutcome::ReplacedPlaceholder {
                    placeholder_id: previous.id,
                }
            }
            None => {
                insert_sorted(list, message);
                ApplyOutcome::Inserted
            }
        };

        self.index.insert(message_id, conversation_id);
        outcome
    }

    /// Bulk-load a history backlog. Messages already present are merged as
    /// duplicates. Returns how many were new.
    pub fn seed(&mut self, conversation_id: &str, messages: Vec<Message>) -> usize {
        let mut inserted = 0;
        for mut message in messages {
            if message.conversation_id.is_empty() {
                message.conversation_id = conversation_id.to_string();
            } else if message.conversation_id != conversation_id {
                warn!(
                    conversation_id,
                    message_id = %message.id,
                    "seeded message belongs to another conversation"
                );
            }
            if let Err(error) = message.validate_identity() {
                warn!(conversation_id, %error, "skipping malformed history message");
                continue;
            }
            if self.apply_remote(message).is_new() {
                inserted += 1;
            }
        }
        debug!(conversation_id, inserted, "message history seeded");
        inserted
    }

    /// Snapshot of one conversation, oldest first
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn latest(&self, conversation_id: &str) -> Option<&Message> {
        self.conversations.get(conversation_id)?.last()
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        let conversation_id = self.index.get(message_id)?;
        self.conversations
            .get(conversation_id)?
            .iter()
            .find(|m| m.id == message_id)
    }

    /// Add `user_id` to one message's readers. Returns `true` when it grew.
    pub fn mark_read_by(&mut self, message_id: &str, user_id: &str) -> bool {
        let Some(conversation_id) = self.index.get(message_id) else {
            debug!(message_id, "read receipt for unknown message");
            return false;
        };
        self.conversations
            .get_mut(conversation_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
            .map_or(false, |message| message.mark_read_by(user_id))
    }

    pub fn pending_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map_or(0, |list| list.iter().filter(|m| m.is_pending()).count())
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.conversations.get(conversation_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Whether the message at `position` sits between its nearest confirmed
/// neighbours. Pending placeholders are not ordered.
fn in_order_at(list: &[Message], position: usize) -> bool {
    let key = list[position].sort_key();
    let after_previous = list[..position]
        .iter()
        .rev()
        .find(|m| !m.is_pending())
        .map_or(true, |previous| previous.sort_key() <= key);
    let before_next = list[position + 1..]
        .iter()
        .find(|m| !m.is_pending())
        .map_or(true, |next| key <= next.sort_key());
    after_previous && before_next
}

/// Insert among confirmed messages in `(created_at, id)` order, ahead of any
/// trailing placeholders.
fn insert_sorted(list: &mut Vec<Message>, message: Message) {
    let position = {
        let key = message.sort_key();
        list.iter()
            .position(|m| !m.is_pending() && m.sort_key() > key)
            .unwrap_or_else(|| {
                list.iter()
                    .rposition(|m| !m.is_pending())
                    .map_or(0, |last| last + 1)
            })
    };
    list.insert(position, message);
}
