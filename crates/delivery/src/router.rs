use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{ConnectionId, Destination, MessageDraft},
    error::ValidationError,
    protocol::{
        ClientEvent, ConversationQuery, ReceiptPayload, ReceiptUpdate, SendMessagePayload,
        ServerEvent, TypingPayload,
    },
};
use storage::{ReceiptKind, StoreError, Storage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    hub::{Broadcaster, Target},
    presence::PresenceRegistry,
    scheduler::DeliveryScheduler,
};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("typing event names neither a room nor a recipient")]
    NoTypingTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Anonymous,
    Registered(String),
    Disconnected,
}

/// Per-connection state owned by the transport's read loop.
#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    state: ConnectionState,
}

impl ConnectionSession {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Anonymous,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Registered(identity) => Some(identity),
            _ => None,
        }
    }
}

/// Single entry point for inbound client events.
///
/// Every failure stops at this boundary: it is logged for the operator and
/// the connection keeps going. Clients never see diagnostics.
#[derive(Clone)]
pub struct EventRouter {
    storage: Storage,
    presence: PresenceRegistry,
    broadcaster: Arc<dyn Broadcaster>,
    scheduler: DeliveryScheduler,
}

impl EventRouter {
    pub fn new(
        storage: Storage,
        presence: PresenceRegistry,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let scheduler =
            DeliveryScheduler::new(storage.clone(), presence.clone(), broadcaster.clone());
        Self {
            storage,
            presence,
            broadcaster,
            scheduler,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn scheduler(&self) -> &DeliveryScheduler {
        &self.scheduler
    }

    pub async fn handle(&self, session: &mut ConnectionSession, event: ClientEvent) {
        let connection = session.id;
        let name = event.name();
        if session.state == ConnectionState::Disconnected {
            warn!(%connection, event = name, "event after disconnect ignored");
            return;
        }

        let result = match event {
            ClientEvent::RegisterUser(identity) => self.register_user(session, &identity).await,
            ClientEvent::JoinRoom(room) => self.join_room(connection, &room).await,
            ClientEvent::LoadPrivateHistory(query) => {
                self.load_private_history(connection, query).await
            }
            ClientEvent::SendMessage(payload) => self.send_message(payload).await,
            ClientEvent::MessageDelivered(receipt) => {
                self.receipt(receipt, ReceiptKind::Delivered).await
            }
            ClientEvent::MessageSeen(receipt) => self.receipt(receipt, ReceiptKind::Seen).await,
            ClientEvent::Typing(typing) => {
                self.relay_typing(connection, typing, ServerEvent::UserTyping)
                    .await
            }
            ClientEvent::StopTyping(typing) => {
                self.relay_typing(connection, typing, ServerEvent::UserStopTyping)
                    .await
            }
        };

        if let Err(error) = result {
            warn!(%connection, event = name, %error, "event dropped");
        }
    }

    /// Terminal transition. Room subscriptions go away with the transport
    /// connection itself.
    pub async fn disconnect(&self, session: &mut ConnectionSession) {
        if session.state == ConnectionState::Disconnected {
            return;
        }
        if let Some(identity) = self.presence.unregister(session.id).await {
            info!(connection = %session.id, identity, "user went offline");
        }
        session.state = ConnectionState::Disconnected;
    }

    async fn register_user(
        &self,
        session: &mut ConnectionSession,
        identity: &str,
    ) -> Result<(), RouteError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ValidationError::EmptyIdentity.into());
        }

        if session.identity().is_some() {
            self.presence.unregister(session.id).await;
        }
        let superseded = self.presence.register(identity, session.id).await;
        if let Some(previous) = superseded.filter(|previous| *previous != session.id) {
            info!(identity, %previous, connection = %session.id, "registration supersedes older connection");
        }
        info!(connection = %session.id, identity, "user registered");
        session.state = ConnectionState::Registered(identity.to_string());
        Ok(())
    }

    async fn join_room(&self, connection: ConnectionId, room: &str) -> Result<(), RouteError> {
        let room = room.trim();
        if room.is_empty() {
            return Err(ValidationError::MissingDestination.into());
        }

        self.broadcaster.join(connection, room).await;
        let history = self.storage.find_by_room(room).await?;
        debug!(%connection, room, messages = history.len(), "sending room history");
        self.broadcaster
            .publish(
                Target::Connection(connection),
                ServerEvent::ChatHistory(history),
            )
            .await;
        Ok(())
    }

    async fn load_private_history(
        &self,
        connection: ConnectionId,
        query: ConversationQuery,
    ) -> Result<(), RouteError> {
        let history = self
            .storage
            .find_conversation(query.sender.trim(), query.receiver.trim())
            .await?;
        self.broadcaster
            .publish(
                Target::Connection(connection),
                ServerEvent::PrivateHistory(history),
            )
            .await;
        Ok(())
    }

    async fn send_message(&self, payload: SendMessagePayload) -> Result<(), RouteError> {
        let draft = MessageDraft::try_from(payload)?;
        self.scheduler.submit(draft, Utc::now()).await;
        Ok(())
    }

    async fn receipt(&self, receipt: ReceiptPayload, kind: ReceiptKind) -> Result<(), RouteError> {
        let username = receipt.username.trim().to_string();
        let message = self
            .storage
            .mark_receipt(receipt.message_id, &username, kind)
            .await?;
        if message.sender == username {
            return Ok(());
        }
        let counterpart = message.counterpart(&username).map(str::to_string);

        let update = ReceiptUpdate {
            message_id: message.id,
            username,
        };
        let event = match kind {
            ReceiptKind::Delivered => ServerEvent::MessageDeliveredUpdate(update),
            ReceiptKind::Seen => ServerEvent::MessageSeenUpdate(update),
        };

        match &message.destination {
            Destination::Room { room } => {
                self.broadcaster
                    .publish(Target::Room(room.clone()), event)
                    .await;
            }
            Destination::Direct { .. } => {
                let Some(counterpart) = counterpart else {
                    return Ok(());
                };
                match self.presence.resolve(&counterpart).await {
                    Some(connection) => {
                        self.broadcaster
                            .publish(Target::Connection(connection), event)
                            .await;
                    }
                    None => {
                        debug!(message_id = %message.id, %counterpart, "receipt counterpart offline")
                    }
                }
            }
        }
        Ok(())
    }

    async fn relay_typing(
        &self,
        connection: ConnectionId,
        typing: TypingPayload,
        wrap: fn(TypingPayload) -> ServerEvent,
    ) -> Result<(), RouteError> {
        let room = typing.room.as_deref().map(str::trim).filter(|r| !r.is_empty());
        let to = typing.to.as_deref().map(str::trim).filter(|t| !t.is_empty());

        let target = match (room, to) {
            (Some(room), _) => Target::RoomExcept {
                room: room.to_string(),
                except: connection,
            },
            (None, Some(to)) => match self.presence.resolve(to).await {
                Some(recipient) => Target::Connection(recipient),
                None => {
                    debug!(%connection, to, "typing target offline");
                    return Ok(());
                }
            },
            (None, None) => return Err(RouteError::NoTypingTarget),
        };
        self.broadcaster.publish(target, wrap(typing)).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
