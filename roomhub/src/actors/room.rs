//! RoomActor - single writer for one discussion room
//!
//! Every mutation of a room's participants and messages goes through this
//! actor's mailbox, so all changes to one room are totally ordered. Outside
//! readers (the reaper, the greeter, status endpoints) use the narrow
//! `RoomStatus` lock that the actor refreshes after each message.
//!
//! Lifecycle: running → shut down. A shut-down actor is never reused; the
//! registry creates a fresh one for the same id on the next reference.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{RoomId, RoomKind, RoomMessage, UserListFrame};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::actors::message_store::MessageStore;
use crate::history::{HistoryStore, HistoryWriter};

// ============================================================================
// Clients
// ============================================================================

/// What a room can push down one client's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// One participant's live connection as seen by the room.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub client_id: String,
    pub user_id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientConnection {
    /// Create a connection plus the receiving end its socket writer drains.
    pub fn new(user_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                client_id: ulid::Ulid::new().to_string(),
                user_id: user_id.into(),
                tx,
            },
            rx,
        )
    }

    fn send_text(&self, text: &str) -> bool {
        self.tx.send(Outbound::Text(text.to_string())).is_ok()
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

// ============================================================================
// Context and status
// ============================================================================

/// Descriptive context for a room, seeded from the content lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomContext {
    pub title: String,
    pub summary: String,
    pub source_url: String,
    pub topic: String,
}

impl RoomContext {
    /// Overlay the non-empty fields of `update`.
    fn merge(&mut self, update: RoomContext) {
        if !update.title.is_empty() {
            self.title = update.title;
        }
        if !update.summary.is_empty() {
            self.summary = update.summary;
        }
        if !update.source_url.is_empty() {
            self.source_url = update.source_url;
        }
        if !update.topic.is_empty() {
            self.topic = update.topic;
        }
    }
}

/// Read-only projection of a room, safe to query from any task.
#[derive(Debug, Clone)]
pub struct RoomStatus {
    pub context: RoomContext,
    pub users: Vec<String>,
    pub participant_count: usize,
    pub message_count: usize,
    pub last_activity_at: DateTime<Utc>,
    pub last_assistant_reply_at: Option<DateTime<Utc>>,
    pub last_external_refresh_at: Option<DateTime<Utc>>,
    pub shutdown_requested: bool,
    pub shut_down: bool,
}

impl RoomStatus {
    fn new(context: RoomContext, message_count: usize) -> Self {
        let now = Utc::now();
        Self {
            context,
            users: Vec::new(),
            participant_count: 0,
            message_count,
            last_activity_at: now,
            last_assistant_reply_at: None,
            last_external_refresh_at: None,
            shutdown_requested: false,
            shut_down: false,
        }
    }
}

type SharedStatus = Arc<RwLock<RoomStatus>>;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Actor
// ============================================================================

#[derive(Debug, Default)]
pub struct RoomActor;

#[derive(Debug, Clone)]
pub struct RoomArguments {
    pub id: RoomId,
    pub context: RoomContext,
    /// Previously persisted messages (durable rooms only)
    pub history: Vec<RoomMessage>,
    /// Where to persist snapshots; `None` for ephemeral rooms
    pub history_store: Option<HistoryStore>,
}

pub struct RoomState {
    id: RoomId,
    context: RoomContext,
    messages: MessageStore,
    participants: Vec<ClientConnection>,
    last_activity_at: DateTime<Utc>,
    last_assistant_reply_at: Option<DateTime<Utc>>,
    last_external_refresh_at: Option<DateTime<Utc>>,
    history: Option<HistoryWriter>,
    status: SharedStatus,
}

#[derive(Debug)]
pub enum RoomMsg {
    /// Add a participant; history is replayed to it before the user list goes out
    Register {
        client: ClientConnection,
        reply: RpcReplyPort<()>,
    },
    /// Remove a participant and close its connection
    Unregister { client_id: String },
    /// Append a message and fan it out
    Broadcast { message: RoomMessage },
    /// Overlay freshly fetched context
    UpdateContext {
        context: RoomContext,
        external_refresh: bool,
    },
    /// Copy of the retained messages, oldest first
    GetHistory {
        reply: RpcReplyPort<Vec<RoomMessage>>,
    },
    /// Close every connection and stop the actor
    Shutdown,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RoomError {
    #[error("room {0} is shut down")]
    ShutDown(String),

    #[error("room rpc failed: {0}")]
    Rpc(String),
}

#[async_trait]
impl Actor for RoomActor {
    type Msg = RoomMsg;
    type State = RoomState;
    type Arguments = (RoomArguments, SharedStatus);

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (args, status): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            room_id = %args.id,
            restored = args.history.len(),
            "RoomActor starting"
        );

        let messages = MessageStore::from_history(args.history);
        let last_assistant_reply_at = messages
            .iter()
            .filter(|m| m.is_assistant)
            .last()
            .map(|m| m.timestamp);
        let history = args
            .history_store
            .map(|store| HistoryWriter::spawn(store, args.id.as_str()));

        let state = RoomState {
            id: args.id,
            context: args.context,
            messages,
            participants: Vec::new(),
            // A restored room counts as active from the moment it is loaded.
            last_activity_at: Utc::now(),
            last_assistant_reply_at,
            last_external_refresh_at: None,
            history,
            status,
        };
        state.publish_status();
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RoomMsg::Register { client, reply } => {
                self.handle_register(client, state);
                state.publish_status();
                let _ = reply.send(());
                return Ok(());
            }
            RoomMsg::Unregister { client_id } => {
                self.handle_unregister(&client_id, state);
            }
            RoomMsg::Broadcast { message } => {
                self.handle_broadcast(message, state);
            }
            RoomMsg::UpdateContext {
                context,
                external_refresh,
            } => {
                state.context.merge(context);
                if external_refresh {
                    state.last_external_refresh_at = Some(Utc::now());
                }
                tracing::debug!(room_id = %state.id, title = %state.context.title, "Room context updated");
            }
            RoomMsg::GetHistory { reply } => {
                let _ = reply.send(state.messages.snapshot());
            }
            RoomMsg::Shutdown => {
                self.handle_shutdown(state);
                state.publish_status();
                myself.stop(Some("shutdown".to_string()));
                return Ok(());
            }
        }
        state.publish_status();
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for client in state.participants.drain(..) {
            client.close();
        }
        if let Some(writer) = state.history.take() {
            writer.close().await;
        }
        {
            let mut status = state.status.write().unwrap_or_else(PoisonError::into_inner);
            status.shut_down = true;
            status.participant_count = 0;
            status.users.clear();
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            room_id = %state.id,
            "RoomActor stopped"
        );
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl RoomActor {
    fn handle_register(&self, client: ClientConnection, state: &mut RoomState) {
        for message in state.messages.iter() {
            if let Some(frame) = encode(message) {
                client.send_text(&frame);
            }
        }

        tracing::info!(
            room_id = %state.id,
            client_id = %client.client_id,
            user_id = %client.user_id,
            "Client joined room"
        );
        state
            .participants
            .retain(|existing| existing.client_id != client.client_id);
        state.participants.push(client);
        state.last_activity_at = Utc::now();
        state.broadcast_user_list();
    }

    fn handle_unregister(&self, client_id: &str, state: &mut RoomState) {
        let Some(pos) = state
            .participants
            .iter()
            .position(|c| c.client_id == client_id)
        else {
            return;
        };
        let client = state.participants.remove(pos);
        client.close();
        tracing::info!(
            room_id = %state.id,
            client_id = %client.client_id,
            user_id = %client.user_id,
            "Client left room"
        );
        state.broadcast_user_list();
    }

    fn handle_broadcast(&self, message: RoomMessage, state: &mut RoomState) {
        let now = Utc::now();
        state.last_activity_at = now;
        if message.is_assistant {
            state.last_assistant_reply_at = Some(now);
        }

        let frame = encode(&message);
        state.messages.push(message);
        state.persist_snapshot();

        if let Some(frame) = frame {
            let dropped = state.fan_out(&frame);
            if dropped > 0 {
                state.broadcast_user_list();
            }
        }
    }

    fn handle_shutdown(&self, state: &mut RoomState) {
        tracing::info!(
            room_id = %state.id,
            participants = state.participants.len(),
            "Room shutting down"
        );
        for client in state.participants.drain(..) {
            client.close();
        }
        let mut status = state.status.write().unwrap_or_else(PoisonError::into_inner);
        status.shutdown_requested = true;
    }
}

impl RoomState {
    /// Send one frame to everyone; drop clients whose channel is gone.
    fn fan_out(&mut self, frame: &str) -> usize {
        let before = self.participants.len();
        self.participants.retain(|client| {
            let delivered = client.send_text(frame);
            if !delivered {
                tracing::debug!(
                    room_id = %self.id,
                    client_id = %client.client_id,
                    "Dropping client after failed write"
                );
            }
            delivered
        });
        before - self.participants.len()
    }

    fn broadcast_user_list(&mut self) {
        let frame = UserListFrame::new(self.user_names());
        match serde_json::to_string(&frame) {
            Ok(json) => {
                // A failed write here shrinks the list; the next change re-announces it.
                self.fan_out(&json);
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize user list"),
        }
    }

    fn user_names(&self) -> Vec<String> {
        let mut users: Vec<String> = Vec::with_capacity(self.participants.len());
        for client in &self.participants {
            if !users.contains(&client.user_id) {
                users.push(client.user_id.clone());
            }
        }
        users
    }

    fn persist_snapshot(&self) {
        if let Some(writer) = &self.history {
            writer.submit(self.messages.snapshot());
        }
    }

    fn publish_status(&self) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        status.context = self.context.clone();
        status.users = self.user_names();
        status.participant_count = self.participants.len();
        status.message_count = self.messages.len();
        status.last_activity_at = self.last_activity_at;
        status.last_assistant_reply_at = self.last_assistant_reply_at;
        status.last_external_refresh_at = self.last_external_refresh_at;
    }
}

fn encode(message: &RoomMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize room message");
            None
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap, clonable reference to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: RoomId,
    actor: ActorRef<RoomMsg>,
    status: SharedStatus,
}

impl RoomHandle {
    /// Spawn the actor for `args` and return its handle.
    pub async fn spawn(args: RoomArguments) -> Result<Self, ractor::SpawnErr> {
        let id = args.id.clone();
        let status = Arc::new(RwLock::new(RoomStatus::new(
            args.context.clone(),
            args.history.len(),
        )));
        let (actor, _handle) = Actor::spawn(None, RoomActor, (args, status.clone())).await?;
        Ok(Self { id, actor, status })
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn kind(&self) -> RoomKind {
        self.id.kind()
    }

    pub fn actor(&self) -> &ActorRef<RoomMsg> {
        &self.actor
    }

    /// True when both handles point at the same actor instance.
    pub fn same_instance(&self, other: &RoomHandle) -> bool {
        self.actor.get_id() == other.actor.get_id()
    }

    pub fn status(&self) -> RoomStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn context(&self) -> RoomContext {
        self.status().context
    }

    pub fn participant_count(&self) -> usize {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .participant_count
    }

    pub fn is_shut_down(&self) -> bool {
        let status = self.status.read().unwrap_or_else(PoisonError::into_inner);
        status.shut_down || status.shutdown_requested
    }

    pub async fn register(&self, client: ClientConnection) -> Result<(), RoomError> {
        if self.is_shut_down() {
            return Err(RoomError::ShutDown(self.id.to_string()));
        }
        ractor::call!(self.actor, |reply| RoomMsg::Register { client, reply })
            .map_err(|e| RoomError::Rpc(e.to_string()))
    }

    pub fn unregister(&self, client_id: impl Into<String>) {
        let client_id = client_id.into();
        if let Err(e) = self.actor.cast(RoomMsg::Unregister { client_id }) {
            tracing::debug!(room_id = %self.id, error = %e, "Unregister after room stopped");
        }
    }

    pub fn broadcast(&self, message: RoomMessage) -> Result<(), RoomError> {
        if self.is_shut_down() {
            return Err(RoomError::ShutDown(self.id.to_string()));
        }
        self.actor
            .cast(RoomMsg::Broadcast { message })
            .map_err(|_| RoomError::ShutDown(self.id.to_string()))
    }

    pub fn update_context(&self, context: RoomContext, external_refresh: bool) {
        if let Err(e) = self.actor.cast(RoomMsg::UpdateContext {
            context,
            external_refresh,
        }) {
            tracing::debug!(room_id = %self.id, error = %e, "Context update after room stopped");
        }
    }

    pub async fn history(&self) -> Result<Vec<RoomMessage>, RoomError> {
        ractor::call!(self.actor, |reply| RoomMsg::GetHistory { reply })
            .map_err(|e| RoomError::Rpc(e.to_string()))
    }

    /// Non-blocking shutdown signal.
    ///
    /// Returns false when a shutdown is already pending or the actor is gone;
    /// neither is an error.
    pub fn request_shutdown(&self) -> bool {
        {
            let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
            if status.shutdown_requested || status.shut_down {
                return false;
            }
            status.shutdown_requested = true;
        }
        self.actor.cast(RoomMsg::Shutdown).is_ok()
    }

    /// Wait until the actor has stopped and flushed its history, up to `limit`.
    pub async fn wait_stopped(&self, limit: Duration) -> bool {
        let stopped = async {
            while !self.status().shut_down {
                tokio::time::sleep(STOP_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(limit, stopped).await.is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::message_store::ROOM_MESSAGE_CAPACITY;
    use tokio::time::timeout;

    async fn spawn_room(raw_id: &str, history_store: Option<HistoryStore>) -> RoomHandle {
        RoomHandle::spawn(RoomArguments {
            id: RoomId::parse(raw_id).unwrap(),
            context: RoomContext {
                title: "Test Room".to_string(),
                ..Default::default()
            },
            history: Vec::new(),
            history_store,
        })
        .await
        .unwrap()
    }

    async fn next_text(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> serde_json::Value {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(Outbound::Text(text))) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Skip frames until a user_list frame arrives.
    async fn next_user_list(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        loop {
            let value = next_text(rx).await;
            if value["type"] == "user_list" {
                return serde_json::from_value(value["users"].clone()).unwrap();
            }
        }
    }

    // ============================================================================
    // Test 1: Register replays history, then announces the user list
    // ============================================================================

    #[tokio::test]
    async fn test_register_replays_history_before_user_list() {
        let room = spawn_room("news_1", None).await;
        room.broadcast(RoomMessage::user("ada", "first")).unwrap();
        room.broadcast(RoomMessage::user("ada", "second")).unwrap();

        let (client, mut rx) = ClientConnection::new("bob");
        room.register(client).await.unwrap();

        assert_eq!(next_text(&mut rx).await["content"], "first");
        assert_eq!(next_text(&mut rx).await["content"], "second");
        let list = next_text(&mut rx).await;
        assert_eq!(list["type"], "user_list");
        assert_eq!(list["users"], serde_json::json!(["bob"]));
        assert_eq!(room.participant_count(), 1);

        room.actor().stop(None);
    }

    // ============================================================================
    // Test 2: Unregister removes, closes and re-announces
    // ============================================================================

    #[tokio::test]
    async fn test_unregister_closes_connection_and_updates_list() {
        let room = spawn_room("post_9", None).await;
        let (alice, mut alice_rx) = ClientConnection::new("alice");
        let (bob, mut bob_rx) = ClientConnection::new("bob");
        let bob_id = bob.client_id.clone();

        room.register(alice).await.unwrap();
        room.register(bob).await.unwrap();
        assert_eq!(next_user_list(&mut alice_rx).await, vec!["alice"]);
        assert_eq!(next_user_list(&mut alice_rx).await, vec!["alice", "bob"]);

        room.unregister(bob_id);
        assert_eq!(next_user_list(&mut alice_rx).await, vec!["alice"]);

        // Bob saw his own join, then the close.
        assert_eq!(next_user_list(&mut bob_rx).await, vec!["alice", "bob"]);
        assert_eq!(
            timeout(Duration::from_secs(2), bob_rx.recv()).await.unwrap(),
            Some(Outbound::Close)
        );
        let _ = room.history().await.unwrap();
        assert_eq!(room.status().users, vec!["alice"]);

        room.actor().stop(None);
    }

    // ============================================================================
    // Test 3: Broadcast reaches everyone and caps retained history
    // ============================================================================

    #[tokio::test]
    async fn test_broadcast_caps_history_at_capacity() {
        let room = spawn_room("video_3", None).await;
        for i in 0..(ROOM_MESSAGE_CAPACITY + 7) {
            room.broadcast(RoomMessage::user("ada", format!("m{i}")))
                .unwrap();
        }

        let history = room.history().await.unwrap();
        assert_eq!(history.len(), ROOM_MESSAGE_CAPACITY);
        assert_eq!(history[0].content, "m7");
        assert_eq!(
            history.last().unwrap().content,
            format!("m{}", ROOM_MESSAGE_CAPACITY + 6)
        );

        room.actor().stop(None);
    }

    // ============================================================================
    // Test 4: A client whose channel is gone is dropped on fan-out
    // ============================================================================

    #[tokio::test]
    async fn test_failed_write_drops_client() {
        let room = spawn_room("news_5", None).await;
        let (gone, gone_rx) = ClientConnection::new("gone");
        let (stay, mut stay_rx) = ClientConnection::new("stay");
        room.register(gone).await.unwrap();
        room.register(stay).await.unwrap();
        drop(gone_rx);

        room.broadcast(RoomMessage::user("stay", "hello")).unwrap();
        let _ = room.history().await.unwrap();

        assert_eq!(room.participant_count(), 1);
        assert_eq!(next_user_list(&mut stay_rx).await, vec!["gone", "stay"]);
        assert_eq!(next_text(&mut stay_rx).await["content"], "hello");
        assert_eq!(next_user_list(&mut stay_rx).await, vec!["stay"]);

        room.actor().stop(None);
    }

    // ============================================================================
    // Test 5: Assistant messages stamp the assistant reply time
    // ============================================================================

    #[tokio::test]
    async fn test_assistant_broadcast_records_reply_time() {
        let room = spawn_room("topic_Dev", None).await;
        assert!(room.status().last_assistant_reply_at.is_none());

        room.broadcast(RoomMessage::assistant("micro", "hi all"))
            .unwrap();
        let history = room.history().await.unwrap();
        assert!(history[0].is_assistant);
        assert!(room.status().last_assistant_reply_at.is_some());

        room.actor().stop(None);
    }

    // ============================================================================
    // Test 6: Shutdown closes connections and is terminal
    // ============================================================================

    #[tokio::test]
    async fn test_shutdown_is_terminal_and_non_blocking() {
        let room = spawn_room("news_7", None).await;
        let (client, mut rx) = ClientConnection::new("ada");
        room.register(client).await.unwrap();
        let _ = next_user_list(&mut rx).await;

        assert!(room.request_shutdown());
        assert!(!room.request_shutdown(), "second signal is skipped");
        assert_eq!(
            timeout(Duration::from_secs(2), rx.recv()).await.unwrap(),
            Some(Outbound::Close)
        );

        timeout(Duration::from_secs(2), async {
            while !room.status().shut_down {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let (late, _late_rx) = ClientConnection::new("late");
        assert!(matches!(
            room.register(late).await,
            Err(RoomError::ShutDown(_))
        ));
        assert!(room.broadcast(RoomMessage::user("x", "y")).is_err());
    }

    // ============================================================================
    // Test 7: Durable rooms persist every broadcast
    // ============================================================================

    #[tokio::test]
    async fn test_durable_room_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let room = spawn_room("topic_Rust", Some(store.clone())).await;

        room.broadcast(RoomMessage::user("ada", "persist me"))
            .unwrap();
        let _ = room.history().await.unwrap();

        let saved = timeout(Duration::from_secs(2), async {
            loop {
                let saved = store.load("topic_Rust").await.unwrap_or_default();
                if !saved.is_empty() {
                    return saved;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(saved[0].content, "persist me");

        room.actor().stop(None);
    }

    // ============================================================================
    // Test 8: Context updates merge non-empty fields
    // ============================================================================

    #[tokio::test]
    async fn test_update_context_merges_and_stamps_refresh() {
        let room = spawn_room("news_8", None).await;
        room.update_context(
            RoomContext {
                summary: "A summary".to_string(),
                ..Default::default()
            },
            true,
        );
        let _ = room.history().await.unwrap();

        let status = room.status();
        assert_eq!(status.context.title, "Test Room");
        assert_eq!(status.context.summary, "A summary");
        assert!(status.last_external_refresh_at.is_some());

        room.actor().stop(None);
    }

    // ============================================================================
    // Test 9: Back-to-back broadcasts leave the newest snapshot on disk
    // ============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_of_broadcasts_persists_latest_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let room = spawn_room("topic_Dev", Some(store.clone())).await;

        for i in 0..30 {
            room.broadcast(RoomMessage::user("ada", format!("m{i}")))
                .unwrap();
        }
        let live = room.history().await.unwrap();
        assert_eq!(live.last().unwrap().content, "m29");

        assert!(room.request_shutdown());
        assert!(room.wait_stopped(Duration::from_secs(5)).await);

        // Stopping flushes the pending write before the room reports shut down.
        assert_eq!(store.load("topic_Dev").await.unwrap(), live);
    }
}
