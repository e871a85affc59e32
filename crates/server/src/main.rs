use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use delivery::{ConnectionSession, EventRouter, Hub, PresenceRegistry, ScheduledTask};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ConnectionId, Destination, Message, TaskId},
    error::{ApiError, ErrorCode, ValidationError},
    protocol::{ClientEvent, ConversationQuery},
};
use storage::{StoreError, Storage};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type HttpError = (StatusCode, Json<ApiError>);

/// Operator view of a send waiting for its deadline.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduledSummary {
    task_id: TaskId,
    deadline: DateTime<Utc>,
    sender: String,
    #[serde(flatten)]
    destination: Destination,
}

impl From<ScheduledTask> for ScheduledSummary {
    fn from(task: ScheduledTask) -> Self {
        Self {
            task_id: task.id,
            deadline: task.deadline,
            sender: task.draft.sender,
            destination: task.draft.destination,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let hub = Hub::new();
    let router = EventRouter::new(storage, PresenceRegistry::new(), Arc::new(hub.clone()));
    let app = build_router(Arc::new(AppState { router, hub }));

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.server_bind))?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rooms/:room/messages", get(http_room_messages))
        .route("/messages/direct", get(http_direct_messages))
        .route("/presence", get(http_presence))
        .route("/scheduled", get(http_scheduled))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

fn store_error(error: StoreError) -> HttpError {
    let status = match &error {
        StoreError::Validation(_) => StatusCode::BAD_REQUEST,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let code = match &error {
        StoreError::Validation(_) => ErrorCode::Validation,
        StoreError::NotFound(_) => ErrorCode::NotFound,
        StoreError::Unavailable(_) => ErrorCode::Unavailable,
    };
    if status == StatusCode::SERVICE_UNAVAILABLE {
        error!(%error, "message store unavailable");
    }
    (status, Json(ApiError::new(code, error.to_string())))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.storage().health_check().await.map_err(|e| {
        warn!(error = %e, "health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Unavailable, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn http_room_messages(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<Json<Vec<Message>>, HttpError> {
    let room = room.trim();
    if room.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ValidationError::MissingDestination.into()),
        ));
    }
    let messages = state.storage().find_by_room(room).await.map_err(store_error)?;
    Ok(Json(messages))
}

async fn http_direct_messages(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ConversationQuery>,
) -> Result<Json<Vec<Message>>, HttpError> {
    let (sender, receiver) = (q.sender.trim(), q.receiver.trim());
    if sender.is_empty() || receiver.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ValidationError::EmptyIdentity.into()),
        ));
    }
    let messages = state
        .storage()
        .find_conversation(sender, receiver)
        .await
        .map_err(store_error)?;
    Ok(Json(messages))
}

async fn http_presence(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.router.presence().online().await)
}

async fn http_scheduled(State(state): State<Arc<AppState>>) -> Json<Vec<ScheduledSummary>> {
    let pending = state.router.scheduler().pending();
    Json(pending.into_iter().map(ScheduledSummary::from).collect())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let connection = ConnectionId::new();
    let outbox = state.hub.attach(connection).await;
    let (mut sender, mut receiver) = socket.split();
    info!(%connection, "connection opened");

    let send_task = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(outbox);
        while let Some(event) = events.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(error) => {
                    warn!(%connection, %error, "failed to encode outbound event");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut session = ConnectionSession::new(connection);
    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%connection, %error, "socket read failed");
                break;
            }
        };
        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => state.router.handle(&mut session, event).await,
                Err(error) => warn!(%connection, %error, "unparseable frame skipped"),
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.router.disconnect(&mut session).await;
    state.hub.detach(connection).await;
    send_task.abort();
    info!(%connection, "connection closed");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
