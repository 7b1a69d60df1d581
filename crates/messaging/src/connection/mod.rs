//! Connection lifecycle: the single channel per session, its state machine,
//! reconnect backoff, and the event-kind handler registry.

pub mod manager;
pub mod registry;
pub mod retry;
pub mod state;
pub mod transport;
pub mod websocket;

pub use manager::{AttemptOutcome, ConnectionEvent, ConnectionManager};
pub use registry::{EventHandler, HandlerRegistry, SubscriptionId};
pub use retry::{Backoff, RetryDecision};
pub use state::{ConnectionState, ConnectionStateMachine};
pub use transport::{
    ChannelHandle, Connector, Credentials, PeerEnd, TransportError, TransportFrame,
};
pub use websocket::WebSocketConnector;
