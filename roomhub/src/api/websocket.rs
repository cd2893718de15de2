//! Room websocket session
//!
//! One task per connection: a writer task drains the room's outbound channel
//! into the socket while this task reads client frames. Each text frame is
//! broadcast to the room, then checked against the assistant triggers:
//! - an explicit `@assistant` mention
//! - an assistant conversation this client started within the window
//! - being alone in a topic room
//!
//! However the read loop ends, the client is unregistered.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use shared_types::{ClientFrame, RoomKind, RoomMessage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::actors::room::{ClientConnection, Outbound, RoomHandle};
use crate::api::{validate_content, ApiError, ApiState};
use crate::app_state::AppState;
use crate::registry::RegistryError;

/// Close code for a rejected identity (RFC 6455 policy violation).
const CLOSE_POLICY: u16 = 1008;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection assistant conversation state.
#[derive(Debug, Default, Clone)]
pub struct AssistantSession {
    pub conversation_active: bool,
    /// Stamped by the reply task once an answer reaches the room.
    pub last_assistant_reply_at: Arc<Mutex<Option<Instant>>>,
}

impl AssistantSession {
    pub fn record_reply(&self, at: Instant) {
        if let Ok(mut last) = self.last_assistant_reply_at.lock() {
            *last = Some(at);
        }
    }

    fn last_reply(&self) -> Option<Instant> {
        self.last_assistant_reply_at.lock().ok().and_then(|last| *last)
    }

    fn in_conversation(&self, now: Instant, window: Duration) -> bool {
        self.conversation_active
            && self
                .last_reply()
                .is_some_and(|at| now.saturating_duration_since(at) <= window)
    }
}

/// Whether a message from this client should get an assistant reply.
pub fn should_trigger_assistant(
    mentioned: bool,
    session: &AssistantSession,
    solitary_in_topic: bool,
    now: Instant,
    window: Duration,
) -> bool {
    mentioned || session.in_conversation(now, window) || solitary_in_topic
}

/// WebSocket handler for `GET /ws/room?id=...`
pub async fn room_websocket(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Response {
    let Some(raw_id) = query.get("id").cloned() else {
        return ApiError::InvalidInput("missing room id".to_string()).into_response();
    };
    let app_state = state.app_state.clone();

    let identity = app_state.authenticator().authenticate(&headers, &query);
    let user_id = match identity {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::info!(room_id = %raw_id, error = %e, "Rejecting unauthenticated room socket");
            return ws
                .on_upgrade(move |socket| reject_socket(socket, e.to_string()))
                .into_response();
        }
    };

    let room = match app_state.registry().get_or_create(&raw_id).await {
        Ok(room) => room,
        Err(RegistryError::InvalidId(e)) => {
            return ApiError::InvalidInput(e.to_string()).into_response();
        }
        Err(e) => return ApiError::Internal(e.to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| handle_room_socket(socket, app_state, room, user_id))
        .into_response()
}

async fn reject_socket(mut socket: WebSocket, reason: String) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_room_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    room: RoomHandle,
    user_id: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let (client, mut outbound) = ClientConnection::new(user_id.clone());
    let client_id = client.client_id.clone();

    let writer = tokio::spawn(async move {
        while let Some(out) = outbound.recv().await {
            match out {
                Outbound::Text(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    if let Err(e) = room.register(client).await {
        tracing::warn!(room_id = %room.id(), user_id = %user_id, error = %e, "Failed to join room");
        writer.abort();
        return;
    }

    let mut session = AssistantSession::default();
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if !handle_text(&app_state, &room, &user_id, &mut session, text.as_str()) {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    room.unregister(client_id);
    // The room sends Close after removing us; let the writer flush it.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer)
        .await
        .is_err()
    {
        tracing::debug!(room_id = %room.id(), "Socket writer did not drain in time");
    }
    tracing::debug!(room_id = %room.id(), user_id = %user_id, "Room socket closed");
}

/// Returns false when the session should end.
fn handle_text(
    app_state: &AppState,
    room: &RoomHandle,
    user_id: &str,
    session: &mut AssistantSession,
    text: &str,
) -> bool {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(room_id = %room.id(), error = %e, "Ignoring malformed client frame");
            return true;
        }
    };
    let content = match validate_content(&frame.content) {
        Ok(content) => content.to_string(),
        Err(e) => {
            tracing::debug!(room_id = %room.id(), user_id = %user_id, error = %e, "Ignoring invalid message");
            return true;
        }
    };

    if let Err(e) = room.broadcast(RoomMessage::user(user_id, content.clone())) {
        tracing::debug!(room_id = %room.id(), error = %e, "Room closed under session");
        return false;
    }

    let assistant = app_state.assistant();
    let mentioned = assistant.mentions_assistant(&content);
    let solitary_in_topic = room.kind() == RoomKind::Topic && room.participant_count() == 1;
    let now = Instant::now();
    let window = app_state.config().timings.conversation_window;

    if should_trigger_assistant(mentioned, session, solitary_in_topic, now, window) {
        if mentioned {
            session.conversation_active = true;
        }
        let replied = session.clone();
        assistant.spawn_room_reply(room.clone(), content, user_id.to_string(), move || {
            replied.record_reply(Instant::now())
        });
    }
    true
}
