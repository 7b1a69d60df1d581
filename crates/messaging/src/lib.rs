//! # Parley Messaging Crate
//!
//! The real-time core of the Parley client: one persistent channel per
//! authenticated session, presence, typing indicators, optimistic message
//! sends and read receipts.
//!
//! ## Architecture
//!
//! - **Connection**: channel lifecycle, reconnect backoff, handler registry
//! - **Services**: presence, typing, message store, receipts, conversation list
//! - **Entities**: users, messages and conversations as seen by the client
//! - **Types**: wire events and errors
//! - **Session**: the context object that owns everything and runs the loop
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use parley_config::AppConfig;
//! use parley_messaging::{ChatSession, Credentials, UserRef, WebSocketConnector};
//!
//! # async fn run() -> parley_messaging::MessagingResult<()> {
//! let config = AppConfig::default();
//! let me = UserRef::new("u1", "Asha", "asha@example.org", "student");
//! let connector = Arc::new(WebSocketConnector::new(&config.server.url, 256));
//!
//! let (session, _task) = ChatSession::spawn(&config, me, connector);
//! session.connect(Credentials::new("token")).await?;
//! session.join_conversation("c1").await?;
//! session.send_message("c1", "hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod entities;
pub mod services;
pub mod session;
pub mod timers;
pub mod types;

pub use connection::{
    ConnectionManager, ConnectionState, Connector, Credentials, SubscriptionId, TransportError,
    WebSocketConnector,
};
pub use entities::{Conversation, DeliveryState, LastMessage, Message, UserRef};
pub use services::{ApplyOutcome, ConversationSummary, PresenceEntry};
pub use session::{ChatSession, SessionHandle};
pub use types::{EventKind, InboundEvent, MessagingError, MessagingResult, OutboundEvent};
