use chrono::{DateTime, Utc};
use serde::{de::IgnoredAny, Deserialize, Deserializer, Serialize};

use crate::{
    domain::{Destination, Message, MessageDraft, MessageId},
    error::ValidationError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    RegisterUser(String),
    JoinRoom(String),
    LoadPrivateHistory(ConversationQuery),
    SendMessage(SendMessagePayload),
    MessageDelivered(ReceiptPayload),
    MessageSeen(ReceiptPayload),
    Typing(TypingPayload),
    StopTyping(TypingPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterUser(_) => "register_user",
            Self::JoinRoom(_) => "join_room",
            Self::LoadPrivateHistory(_) => "load_private_history",
            Self::SendMessage(_) => "send_message",
            Self::MessageDelivered(_) => "message_delivered",
            Self::MessageSeen(_) => "message_seen",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ChatHistory(Vec<Message>),
    PrivateHistory(Vec<Message>),
    ReceiveMessage(Message),
    MessageDeliveredUpdate(ReceiptUpdate),
    MessageSeenUpdate(ReceiptUpdate),
    UserTyping(TypingPayload),
    UserStopTyping(TypingPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationQuery {
    pub sender: String,
    pub receiver: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub sender: String,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media: Option<String>,
    /// Client wall clock at send time. Informational only; the server clock
    /// decides `createdAt`, so a value in an unknown shape reads as `None`.
    #[serde(default, deserialize_with = "lenient_time")]
    pub timestamp: Option<WireTime>,
    #[serde(default)]
    pub scheduled_time: Option<WireTime>,
}

/// A client-supplied instant: epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTime {
    Millis(i64),
    Rfc3339(DateTime<Utc>),
}

impl WireTime {
    pub fn to_utc(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => DateTime::from_timestamp_millis(ms),
            Self::Rfc3339(at) => Some(at),
        }
    }
}

impl From<DateTime<Utc>> for WireTime {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Rfc3339(at)
    }
}

fn lenient_time<'de, D>(deserializer: D) -> Result<Option<WireTime>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Time(WireTime),
        Other(IgnoredAny),
    }

    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Time(time)) => Some(time),
        Some(Loose::Other(_)) | None => None,
    })
}

impl TryFrom<SendMessagePayload> for MessageDraft {
    type Error = ValidationError;

    fn try_from(payload: SendMessagePayload) -> Result<Self, Self::Error> {
        let destination = match (non_empty(payload.room), non_empty(payload.receiver)) {
            (Some(room), _) => Destination::Room { room },
            (None, Some(receiver)) => Destination::Direct { receiver },
            (None, None) => return Err(ValidationError::MissingDestination),
        };

        let scheduled_for = payload
            .scheduled_time
            .map(|time| time.to_utc().ok_or(ValidationError::InvalidScheduledTime))
            .transpose()?;

        let draft = MessageDraft {
            sender: payload.sender.trim().to_string(),
            body: payload
                .message
                .map(|body| body.trim().to_string())
                .unwrap_or_default(),
            media: non_empty(payload.media),
            destination,
            scheduled_for,
        };
        draft.validate()?;
        Ok(draft)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptPayload {
    pub message_id: MessageId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptUpdate {
    pub message_id: MessageId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub user: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
