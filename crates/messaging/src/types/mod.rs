//! Shared types for the messaging core.
//!
//! Identifiers, the error taxonomy, and the inbound/outbound event
//! vocabulary spoken over the channel.

pub mod errors;
pub mod events;

pub use errors::{MessagingError, MessagingResult};
pub use events::*;

// Common type aliases
pub type ConversationId = String;
pub type MessageId = String;
pub type UserId = String;
