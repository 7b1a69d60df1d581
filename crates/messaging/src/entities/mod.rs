//! Domain entities observed by the messaging core.
//!
//! These are snapshots of backend records; the core never owns their
//! server-side lifecycle.

pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::{Conversation, LastMessage};
pub use message::{DeliveryState, Message};
pub use user::UserRef;
