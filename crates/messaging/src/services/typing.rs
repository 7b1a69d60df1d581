//! Typing indicators in both directions.
//!
//! Local activity is debounced into at most one `typing.start` per burst,
//! followed by exactly one `typing.stop` when the burst ends. Remote signals
//! are aggregated per conversation and expire on their own if the matching
//! stop never arrives.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::timers::{TimerFired, TimerKey, TimerSender, Timers};
use crate::types::{ConversationId, OutboundEvent, TypingPayload, UserId};

/// One remote typing signal stamped with its arrival time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub observed_at: Instant,
}

impl TypingSignal {
    pub fn observed(payload: TypingPayload, observed_at: Instant) -> Self {
        Self {
            conversation_id: payload.conversation_id,
            user_id: payload.user_id,
            is_typing: payload.is_typing,
            observed_at,
        }
    }
}

pub struct TypingCoordinator {
    idle_timeout: Duration,
    remote_expiry: Duration,
    /// Conversations where a start went out and no stop followed yet
    signalling: HashSet<ConversationId>,
    /// Last refresh per remote typist
    remote: HashMap<ConversationId, HashMap<UserId, Instant>>,
    timers: Timers,
}

impl TypingCoordinator {
    pub fn new(idle_timeout: Duration, remote_expiry: Duration, timer_tx: TimerSender) -> Self {
        Self {
            idle_timeout,
            remote_expiry,
            signalling: HashSet::new(),
            remote: HashMap::new(),
            timers: Timers::new(timer_tx),
        }
    }

    /// Record a keystroke. Returns a start signal only when the conversation
    /// was not already signalling; the idle timer is re-armed every time.
    pub fn notify_typing(&mut self, conversation_id: &str) -> Option<OutboundEvent> {
        self.timers.arm(
            TimerKey::TypingIdle(conversation_id.to_string()),
            self.idle_timeout,
        );

        if self.signalling.insert(conversation_id.to_string()) {
            debug!(conversation_id, "local typing started");
            Some(OutboundEvent::typing_start(conversation_id))
        } else {
            None
        }
    }

    /// Explicit end of a burst, e.g. on send.
    pub fn notify_stopped(&mut self, conversation_id: &str) -> Option<OutboundEvent> {
        self.timers
            .cancel(&TimerKey::TypingIdle(conversation_id.to_string()));
        self.stop_local(conversation_id)
    }

    fn stop_local(&mut self, conversation_id: &str) -> Option<OutboundEvent> {
        if self.signalling.remove(conversation_id) {
            debug!(conversation_id, "local typing stopped");
            Some(OutboundEvent::typing_stop(conversation_id))
        } else {
            None
        }
    }

    /// Handle a fired typing timer. Stale or foreign fires are ignored.
    pub fn on_timer(&mut self, fired: &TimerFired) -> Option<OutboundEvent> {
        if !self.timers.take_if_current(fired) {
            return None;
        }

        match &fired.key {
            TimerKey::TypingIdle(conversation_id) => self.stop_local(conversation_id),
            TimerKey::TypingExpiry(conversation_id, user_id) => {
                debug!(conversation_id, user_id, "remote typing expired");
                self.forget_remote(conversation_id, user_id);
                None
            }
            TimerKey::Reconnect => None,
        }
    }

    pub fn apply_remote_signal(&mut self, signal: TypingSignal) {
        if signal.conversation_id.is_empty() || signal.user_id.is_empty() {
            debug!("dropping typing signal without ids");
            return;
        }

        let key = TimerKey::TypingExpiry(signal.conversation_id.clone(), signal.user_id.clone());
        if signal.is_typing {
            self.timers.arm(key, self.remote_expiry);
            self.remote
                .entry(signal.conversation_id)
                .or_default()
                .insert(signal.user_id, signal.observed_at);
        } else {
            self.timers.cancel(&key);
            self.forget_remote(&signal.conversation_id, &signal.user_id);
        }
    }

    /// Drop one remote typist, e.g. once their message has arrived.
    pub fn clear_remote(&mut self, conversation_id: &str, user_id: &str) {
        self.timers.cancel(&TimerKey::TypingExpiry(
            conversation_id.to_string(),
            user_id.to_string(),
        ));
        self.forget_remote(conversation_id, user_id);
    }

    fn forget_remote(&mut self, conversation_id: &str, user_id: &str) {
        if let Some(users) = self.remote.get_mut(conversation_id) {
            users.remove(user_id);
            if users.is_empty() {
                self.remote.remove(conversation_id);
            }
        }
    }

    /// Remote users typing in `conversation_id` right now.
    ///
    /// Entries older than the expiry window are excluded even if their timer
    /// has not been processed yet.
    pub fn who_is_typing(&self, conversation_id: &str, excluding: &str) -> BTreeSet<UserId> {
        let Some(users) = self.remote.get(conversation_id) else {
            return BTreeSet::new();
        };

        users
            .iter()
            .filter(|(user_id, observed_at)| {
                user_id.as_str() != excluding && observed_at.elapsed() < self.remote_expiry
            })
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }

    pub fn is_signalling(&self, conversation_id: &str) -> bool {
        self.signalling.contains(conversation_id)
    }

    /// Cancel every timer for the conversation and forget its typists.
    /// Returns the stop signal owed if the local user was typing.
    pub fn leave_conversation(&mut self, conversation_id: &str) -> Option<OutboundEvent> {
        let cancelled = self.timers.cancel_where(|key| match key {
            TimerKey::TypingIdle(id) | TimerKey::TypingExpiry(id, _) => id == conversation_id,
            TimerKey::Reconnect => false,
        });
        debug!(conversation_id, cancelled, "typing timers cancelled");

        self.remote.remove(conversation_id);
        self.stop_local(conversation_id)
    }

    /// Forget everything and cancel every timer
    pub fn clear(&mut self) {
        self.timers.cancel_all();
        self.signalling.clear();
        self.remote.clear();
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}
