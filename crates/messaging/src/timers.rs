//! Cancellable one-shot timers delivered onto the session loop.
//!
//! Each armed timer is a spawned task that sleeps and then posts a
//! [`TimerFired`] back to the owning loop. Re-arming a key aborts the
//! previous task and bumps the generation, so a fire that raced a cancel is
//! recognised as stale by [`Timers::take_if_current`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{ConversationId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Local typing inactivity window for one conversation
    TypingIdle(ConversationId),
    /// Expiry of one remote user's typing entry
    TypingExpiry(ConversationId, UserId),
    /// Next reconnect attempt for the session
    Reconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub generation: u64,
}

pub type TimerSender = mpsc::UnboundedSender<TimerFired>;
pub type TimerReceiver = mpsc::UnboundedReceiver<TimerFired>;

pub fn timer_channel() -> (TimerSender, TimerReceiver) {
    mpsc::unbounded_channel()
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Timer set owned by exactly one component.
pub struct Timers {
    fired_tx: TimerSender,
    armed: HashMap<TimerKey, ArmedTimer>,
    next_generation: u64,
}

impl Timers {
    pub fn new(fired_tx: TimerSender) -> Self {
        Self {
            fired_tx,
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arm `key`, cancelling any timer already armed for it.
    pub fn arm(&mut self, key: TimerKey, delay: Duration) {
        self.cancel(&key);

        self.next_generation += 1;
        let generation = self.next_generation;
        let fired = TimerFired {
            key: key.clone(),
            generation,
        };
        let tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        });

        self.armed.insert(key, ArmedTimer { generation, handle });
    }

    /// Cancel the timer for `key`. Returns `true` if one was armed.
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.armed.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer whose key matches `predicate`.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&TimerKey) -> bool) -> usize {
        let keys: Vec<TimerKey> = self
            .armed
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &keys {
            self.cancel(key);
        }
        keys.len()
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.handle.abort();
        }
    }

    /// Consume a fire notification if it belongs to the currently armed
    /// generation of its key. Stale fires return `false`.
    pub fn take_if_current(&mut self, fired: &TimerFired) -> bool {
        match self.armed.get(&fired.key) {
            Some(timer) if timer.generation == fired.generation => {
                self.armed.remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.armed.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
