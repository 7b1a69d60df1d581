use serde::{Deserialize, Serialize};

use crate::types::{MessagingError, MessagingResult};

/// Connectivity of the session's single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Guards the `Disconnected -> Connecting -> Connected` transitions.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn begin_connect(&mut self) -> MessagingResult<ConnectionState> {
        self.transition_from_state(
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            "begin_connect",
        )
    }

    pub fn on_established(&mut self) -> MessagingResult<ConnectionState> {
        self.transition_from_state(
            ConnectionState::Connecting,
            ConnectionState::Connected,
            "on_established",
        )
    }

    pub fn on_failed(&mut self) -> MessagingResult<ConnectionState> {
        self.transition_from_state(
            ConnectionState::Connecting,
            ConnectionState::Disconnected,
            "on_failed",
        )
    }

    pub fn on_lost(&mut self) -> MessagingResult<ConnectionState> {
        self.transition_from_state(
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            "on_lost",
        )
    }

    /// Unconditional teardown. Returns the state that was left.
    pub fn reset(&mut self) -> ConnectionState {
        std::mem::replace(&mut self.state, ConnectionState::Disconnected)
    }

    fn transition_from_state(
        &mut self,
        expected: ConnectionState,
        next: ConnectionState,
        action: &str,
    ) -> MessagingResult<ConnectionState> {
        if self.state != expected {
            return Err(MessagingError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(next)
    }
}
