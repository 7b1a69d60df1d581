//! Error types for the messaging core.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

/// Main error type for the messaging core.
///
/// Transport faults are not represented here as failures of user actions:
/// they surface as connection state changes and `error` events instead.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("cannot run '{action}' while connection is {state:?}")]
    InvalidState {
        state: ConnectionState,
        action: String,
    },

    #[error("a session is already active; disconnect before connecting again")]
    AlreadyConnected,

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Malformed event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error("session event loop has shut down")]
    SessionClosed,
}

impl MessagingError {
    /// Build a standard invalid-state-transition error
    pub fn invalid_state(state: ConnectionState, action: impl Into<String>) -> Self {
        Self::InvalidState {
            state,
            action: action.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MessagingError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::SessionClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for MessagingError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::SessionClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_names_action_and_state() {
        let err = MessagingError::invalid_state(ConnectionState::Connected, "begin_connect");
        assert_eq!(
            err.to_string(),
            "cannot run 'begin_connect' while connection is Connected"
        );
    }

    #[test]
    fn malformed_json_converts_into_malformed_event() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json")
            .expect_err("input is not valid json");
        let err: MessagingError = json_err.into();
        assert!(matches!(err, MessagingError::MalformedEvent(_)));
    }
}
