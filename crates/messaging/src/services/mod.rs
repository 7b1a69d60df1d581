//! Stateful components fed by inbound events.
//!
//! None of these own the channel. Operations that need to reach the backend
//! return an [`OutboundEvent`](crate::types::OutboundEvent) for the session
//! to send through the connection manager.

pub mod conversation_list;
pub mod message_store;
pub mod presence;
pub mod receipts;
pub mod typing;

pub use conversation_list::{ConversationList, ConversationSummary};
pub use message_store::{ApplyOutcome, MessageStore};
pub use presence::{PresenceEntry, PresenceTracker};
pub use receipts::ReadReceiptReconciler;
pub use typing::{TypingCoordinator, TypingSignal};
