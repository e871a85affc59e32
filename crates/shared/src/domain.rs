use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(TaskId);

/// Handle for one live transport connection. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a message goes. On the wire this is flattened into the message, so
/// a record carries either a `room` or a `receiver` field, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    Room { room: String },
    Direct { receiver: String },
}

impl Destination {
    pub fn room(name: impl Into<String>) -> Self {
        Self::Room { room: name.into() }
    }

    pub fn direct(receiver: impl Into<String>) -> Self {
        Self::Direct {
            receiver: receiver.into(),
        }
    }

    pub fn room_name(&self) -> Option<&str> {
        match self {
            Self::Room { room } => Some(room),
            Self::Direct { .. } => None,
        }
    }

    pub fn receiver(&self) -> Option<&str> {
        match self {
            Self::Room { .. } => None,
            Self::Direct { receiver } => Some(receiver),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    #[serde(rename = "message", default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(flatten)]
    pub destination: Destination,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_to: Vec<String>,
    #[serde(default)]
    pub seen_by: Vec<String>,
}

impl Message {
    /// The other party of a direct message, seen from `identity`.
    pub fn counterpart(&self, identity: &str) -> Option<&str> {
        let receiver = self.destination.receiver()?;
        if identity == self.sender {
            Some(receiver)
        } else {
            Some(&self.sender)
        }
    }
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender: String,
    pub body: String,
    pub media: Option<String>,
    pub destination: Destination,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl MessageDraft {
    pub fn new(sender: impl Into<String>, body: impl Into<String>, destination: Destination) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            media: None,
            destination,
            scheduled_for: None,
        }
    }

    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Copy with surrounding whitespace removed from every text field; a
    /// blank media reference becomes `None`.
    pub fn normalized(&self) -> Self {
        let destination = match &self.destination {
            Destination::Room { room } => Destination::room(room.trim()),
            Destination::Direct { receiver } => Destination::direct(receiver.trim()),
        };
        Self {
            sender: self.sender.trim().to_string(),
            body: self.body.trim().to_string(),
            media: self
                .media
                .as_deref()
                .map(str::trim)
                .filter(|media| !media.is_empty())
                .map(str::to_string),
            destination,
            scheduled_for: self.scheduled_for,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sender.trim().is_empty() {
            return Err(ValidationError::EmptySender);
        }
        let has_media = self
            .media
            .as_deref()
            .is_some_and(|media| !media.trim().is_empty());
        if self.body.trim().is_empty() && !has_media {
            return Err(ValidationError::EmptyContent);
        }
        let target = match &self.destination {
            Destination::Room { room } => room,
            Destination::Direct { receiver } => receiver,
        };
        if target.trim().is_empty() {
            return Err(ValidationError::MissingDestination);
        }
        Ok(())
    }
}
