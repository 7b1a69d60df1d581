use std::collections::HashMap;

use tracing::debug;

use crate::types::{EventKind, InboundEvent};

/// Callback invoked for every inbound event of the subscribed kind.
pub type EventHandler = Box<dyn FnMut(&InboundEvent) + Send + 'static>;

/// Token returned by [`HandlerRegistry::on`], required to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Event-kind keyed handler lists owned by the connection manager.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
    next_id: u64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers.entry(kind).or_default().push((id, handler));
        debug!(event = kind.as_str(), subscription = id.0, "handler registered");
        id
    }

    /// Remove one handler. Returns `false` if it was not registered.
    pub fn off(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() < before;
        if list.is_empty() {
            self.handlers.remove(&kind);
        }
        removed
    }

    /// Invoke every handler registered for the event's kind, in
    /// registration order.
    pub fn dispatch(&mut self, event: &InboundEvent) -> usize {
        let Some(list) = self.handlers.get_mut(&event.kind()) else {
            return 0;
        };
        for (_, handler) in list.iter_mut() {
            handler(event);
        }
        list.len()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
