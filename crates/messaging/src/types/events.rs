//! Event types exchanged over the real-time channel.
//!
//! Every frame is a JSON envelope `{"event": "<kind>", "data": {...}}`.

use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageId, MessagingResult, UserId};
use crate::entities::Message;

/// Discriminant of an inbound event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PresenceOnline,
    PresenceOffline,
    TypingSignal,
    MessageNew,
    MessageRead,
    Connect,
    Disconnect,
    Error,
}

impl EventKind {
    /// Wire name of the event kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PresenceOnline => "presence.online",
            EventKind::PresenceOffline => "presence.offline",
            EventKind::TypingSignal => "typing.signal",
            EventKind::MessageNew => "message.new",
            EventKind::MessageRead => "message.read",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub message: Message,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    pub message_ids: Vec<MessageId>,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DisconnectPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Events consumed from the backend, plus transport-level notifications
/// synthesized by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "presence.online")]
    PresenceOnline(PresencePayload),
    #[serde(rename = "presence.offline")]
    PresenceOffline(PresencePayload),
    #[serde(rename = "typing.signal")]
    TypingSignal(TypingPayload),
    #[serde(rename = "message.new")]
    MessageNew(NewMessagePayload),
    #[serde(rename = "message.read")]
    MessageRead(ReadReceiptPayload),
    #[serde(rename = "connect")]
    Connect,
    #[serde(rename = "disconnect")]
    Disconnect(DisconnectPayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl InboundEvent {
    /// Decode one text frame
    pub fn decode(frame: &str) -> MessagingResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::PresenceOnline(_) => EventKind::PresenceOnline,
            InboundEvent::PresenceOffline(_) => EventKind::PresenceOffline,
            InboundEvent::TypingSignal(_) => EventKind::TypingSignal,
            InboundEvent::MessageNew(_) => EventKind::MessageNew,
            InboundEvent::MessageRead(_) => EventKind::MessageRead,
            InboundEvent::Connect => EventKind::Connect,
            InboundEvent::Disconnect(_) => EventKind::Disconnect,
            InboundEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        InboundEvent::Disconnect(DisconnectPayload {
            reason: Some(reason.into()),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        InboundEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: ConversationId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub message_ids: Vec<MessageId>,
}

/// Events produced by user actions and sent through the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "conversation.join")]
    ConversationJoin(ConversationRef),
    #[serde(rename = "conversation.leave")]
    ConversationLeave(ConversationRef),
    #[serde(rename = "message.send")]
    MessageSend(SendMessagePayload),
    #[serde(rename = "message.markRead")]
    MarkRead(MarkReadPayload),
    #[serde(rename = "typing.start")]
    TypingStart(ConversationRef),
    #[serde(rename = "typing.stop")]
    TypingStop(ConversationRef),
}

impl OutboundEvent {
    pub fn join(conversation_id: impl Into<ConversationId>) -> Self {
        OutboundEvent::ConversationJoin(ConversationRef {
            conversation_id: conversation_id.into(),
        })
    }

    pub fn leave(conversation_id: impl Into<ConversationId>) -> Self {
        OutboundEvent::ConversationLeave(ConversationRef {
            conversation_id: conversation_id.into(),
        })
    }

    pub fn send_message(
        conversation_id: impl Into<ConversationId>,
        content: impl Into<String>,
    ) -> Self {
        OutboundEvent::MessageSend(SendMessagePayload {
            conversation_id: conversation_id.into(),
            content: content.into(),
        })
    }

    pub fn mark_read(message_ids: Vec<MessageId>) -> Self {
        OutboundEvent::MarkRead(MarkReadPayload { message_ids })
    }

    pub fn typing_start(conversation_id: impl Into<ConversationId>) -> Self {
        OutboundEvent::TypingStart(ConversationRef {
            conversation_id: conversation_id.into(),
        })
    }

    pub fn typing_stop(conversation_id: impl Into<ConversationId>) -> Self {
        OutboundEvent::TypingStop(ConversationRef {
            conversation_id: conversation_id.into(),
        })
    }

    /// Encode as one text frame
    pub fn encode(&self) -> MessagingResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Get event type name for logging
    pub fn event_type_name(&self) -> &'static str {
        match self {
            OutboundEvent::ConversationJoin(_) => "conversation.join",
            OutboundEvent::ConversationLeave(_) => "conversation.leave",
            OutboundEvent::MessageSend(_) => "message.send",
            OutboundEvent::MarkRead(_) => "message.markRead",
            OutboundEvent::TypingStart(_) => "typing.start",
            OutboundEvent::TypingStop(_) => "typing.stop",
        }
    }
}
