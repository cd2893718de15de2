//! Room Registry - process-wide map from room id to running room
//!
//! Rooms are created on first reference. Creation does a bounded content
//! lookup outside the lock, then re-checks under the write lock so that
//! concurrent callers for the same unseen id all end up with one actor.
//!
//! Side tasks started per room:
//! - topic rooms get an ambient greeter
//! - rooms whose content was not indexed yet get a backfill subscriber that
//!   waits for `IndexEvent::Completed` (or a timeout) and then re-fetches

use chrono::Utc;
use futures_util::future::join_all;
use shared_types::{RoomId, RoomIdError, RoomKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::actors::room::{RoomArguments, RoomContext, RoomHandle, RoomStatus};
use crate::assistant::AssistantPipeline;
use crate::collaborators::{IndexEntry, SearchIndex};
use crate::config::RoomTimings;
use crate::events::{EventBus, IndexEvent};
use crate::history::HistoryStore;
use crate::schedulers;

/// Upper bound on waiting for rooms to stop in `shutdown_all`.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid room id: {0}")]
    InvalidId(#[from] RoomIdError),

    #[error("failed to start room {room_id}: {reason}")]
    Spawn { room_id: String, reason: String },
}

/// Everything a registry needs to build rooms.
pub struct RegistryDeps {
    pub index: Arc<dyn SearchIndex>,
    pub assistant: Arc<AssistantPipeline>,
    pub history: HistoryStore,
    pub events: EventBus,
    pub timings: RoomTimings,
}

#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: RwLock<HashMap<String, RoomHandle>>,
    index: Arc<dyn SearchIndex>,
    assistant: Arc<AssistantPipeline>,
    history: HistoryStore,
    events: EventBus,
    timings: RoomTimings,
}

/// Context for a room backed by an index entry.
pub fn context_from_entry(entry: &IndexEntry) -> RoomContext {
    RoomContext {
        title: entry.title.clone(),
        summary: entry.summary.clone(),
        source_url: entry.url.clone(),
        topic: entry.topic.clone().unwrap_or_default(),
    }
}

fn placeholder_context(id: &RoomId) -> RoomContext {
    let mut context = RoomContext {
        title: id.kind().placeholder_title(id.subject()),
        ..Default::default()
    };
    if id.kind() == RoomKind::Topic {
        context.topic = id.subject().to_string();
    }
    context
}

impl RoomRegistry {
    pub fn new(deps: RegistryDeps) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: RwLock::new(HashMap::new()),
                index: deps.index,
                assistant: deps.assistant,
                history: deps.history,
                events: deps.events,
                timings: deps.timings,
            }),
        }
    }

    pub fn timings(&self) -> &RoomTimings {
        &self.inner.timings
    }

    pub fn assistant(&self) -> &Arc<AssistantPipeline> {
        &self.inner.assistant
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Running room for `raw_id`, creating it if needed.
    pub async fn get_or_create(&self, raw_id: &str) -> Result<RoomHandle, RegistryError> {
        let id = RoomId::parse(raw_id)?;

        // Fast path
        if let Some(room) = self.get(id.as_str()).await {
            return Ok(room);
        }

        // Subscribe before the lookup so a completion published meanwhile is not missed.
        let backfill_rx = self.inner.events.subscribe();
        let (context, indexed) = self.lookup_context(&id).await;
        let history = if id.kind().is_durable() {
            match self.inner.history.load(id.as_str()).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(room_id = %id, error = %e, "Failed to load room history");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut rooms = self.inner.rooms.write().await;
        if let Some(existing) = rooms.get(id.as_str()) {
            if !existing.is_shut_down() {
                tracing::debug!(room_id = %id, "Room creation race collapsed");
                return Ok(existing.clone());
            }
        }

        let durable = id.kind().is_durable();
        let room = RoomHandle::spawn(RoomArguments {
            id: id.clone(),
            context,
            history,
            history_store: durable.then(|| self.inner.history.clone()),
        })
        .await
        .map_err(|e| RegistryError::Spawn {
            room_id: id.to_string(),
            reason: e.to_string(),
        })?;
        rooms.insert(id.as_str().to_string(), room.clone());
        drop(rooms);

        tracing::info!(room_id = %id, kind = %id.kind(), indexed, "Room created");

        if durable {
            schedulers::spawn_greeter(
                room.clone(),
                Arc::clone(&self.inner.assistant),
                self.inner.timings.clone(),
            );
        }
        if !indexed && !durable {
            self.spawn_backfill(room.clone(), backfill_rx);
        }
        Ok(room)
    }

    /// Seed context for a new room. The bool is false when the content was
    /// not found (or the lookup timed out) and a placeholder was used.
    async fn lookup_context(&self, id: &RoomId) -> (RoomContext, bool) {
        if id.kind() == RoomKind::Topic {
            return (placeholder_context(id), true);
        }

        let lookup = self.inner.index.get_entry(id.subject());
        match tokio::time::timeout(self.inner.timings.lookup_timeout, lookup).await {
            Ok(Ok(Some(entry))) => (context_from_entry(&entry), true),
            Ok(Ok(None)) => {
                tracing::debug!(room_id = %id, "No indexed content yet, using placeholder");
                (placeholder_context(id), false)
            }
            Ok(Err(e)) => {
                tracing::warn!(room_id = %id, error = %e, "Content lookup failed, using placeholder");
                (placeholder_context(id), false)
            }
            Err(_) => {
                tracing::warn!(room_id = %id, "Content lookup timed out, using placeholder");
                (placeholder_context(id), false)
            }
        }
    }

    fn spawn_backfill(
        &self,
        room: RoomHandle,
        mut rx: broadcast::Receiver<IndexEvent>,
    ) -> JoinHandle<()> {
        let index = Arc::clone(&self.inner.index);
        let wait = self.inner.timings.backfill_wait;

        tokio::spawn(async move {
            let subject = room.id().subject().to_string();
            let completed = tokio::time::timeout(wait, async {
                loop {
                    match rx.recv().await {
                        Ok(IndexEvent::Completed { entry_id }) if entry_id == subject => {
                            return true;
                        }
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return false,
                    }
                }
            })
            .await
            .unwrap_or(false);

            if room.is_shut_down() {
                return;
            }
            if !completed {
                tracing::debug!(room_id = %room.id(), "No index event, trying fallback fetch");
            }

            match index.get_entry(&subject).await {
                Ok(Some(entry)) => {
                    tracing::info!(room_id = %room.id(), title = %entry.title, "Room context backfilled");
                    room.update_context(context_from_entry(&entry), false);
                }
                Ok(None) => {
                    tracing::debug!(room_id = %room.id(), "Backfill found no entry, keeping placeholder");
                }
                Err(e) => {
                    tracing::warn!(room_id = %room.id(), error = %e, "Backfill fetch failed");
                }
            }
        })
    }

    /// Running room for an already-parsed id, if any.
    pub async fn get(&self, id: &str) -> Option<RoomHandle> {
        let id = RoomId::parse(id).ok()?;
        let rooms = self.inner.rooms.read().await;
        rooms.get(id.as_str()).filter(|room| !room.is_shut_down()).cloned()
    }

    /// Remove `room` if it is still the registered instance for its id.
    pub async fn remove(&self, room: &RoomHandle) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        match rooms.get(room.id().as_str()) {
            Some(current) if current.same_instance(room) => {
                rooms.remove(room.id().as_str());
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every registered room, including ones shutting down.
    pub async fn rooms(&self) -> Vec<RoomHandle> {
        self.inner.rooms.read().await.values().cloned().collect()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    pub async fn status(&self, id: &str) -> Option<RoomStatus> {
        self.get(id).await.map(|room| room.status())
    }

    /// Summary per live topic room, keyed by topic subject.
    pub async fn topic_summaries(&self) -> BTreeMap<String, String> {
        let rooms = self.inner.rooms.read().await;
        rooms
            .values()
            .filter(|room| room.kind() == RoomKind::Topic && !room.is_shut_down())
            .filter_map(|room| {
                let summary = room.context().summary;
                (!summary.is_empty()).then(|| (room.id().subject().to_string(), summary))
            })
            .collect()
    }

    /// Stop every room, empty the registry and wait for pending history writes.
    pub async fn shutdown_all(&self) {
        let rooms: Vec<RoomHandle> = {
            let mut rooms = self.inner.rooms.write().await;
            rooms.drain().map(|(_, room)| room).collect()
        };
        tracing::info!(rooms = rooms.len(), "Shutting down all rooms");
        for room in &rooms {
            room.request_shutdown();
        }
        let stopped = join_all(rooms.iter().map(|room| room.wait_stopped(SHUTDOWN_WAIT))).await;
        let lingering = stopped.iter().filter(|done| !**done).count();
        if lingering > 0 {
            tracing::warn!(rooms = lingering, "Rooms still stopping after shutdown wait");
        }
    }

    /// Refresh context for rooms sourced from `source_url`, at most once per
    /// throttle window. Returns how many rooms were refreshed.
    pub async fn refresh_external(&self, source_url: &str) -> usize {
        let throttle = self.inner.timings.external_refresh_throttle;
        let now = Utc::now();
        let mut refreshed = 0;

        for room in self.rooms().await {
            let status = room.status();
            if status.shut_down || status.context.source_url != source_url {
                continue;
            }
            if let Some(last) = status.last_external_refresh_at {
                if (now - last).to_std().unwrap_or_default() < throttle {
                    tracing::debug!(room_id = %room.id(), "External refresh throttled");
                    continue;
                }
            }

            let context = match self.inner.index.get_entry(room.id().subject()).await {
                Ok(Some(entry)) => context_from_entry(&entry),
                Ok(None) => RoomContext::default(),
                Err(e) => {
                    tracing::warn!(room_id = %room.id(), error = %e, "External refresh fetch failed");
                    RoomContext::default()
                }
            };
            // Stamp the refresh time even when nothing new was found.
            room.update_context(context, true);
            refreshed += 1;
        }
        refreshed
    }

    /// Listen for external refresh requests until the bus closes.
    pub fn spawn_event_listener(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let mut rx = self.inner.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(IndexEvent::ExternalRefreshRequested { source_url }) => {
                        let refreshed = registry.refresh_external(&source_url).await;
                        tracing::debug!(source_url = %source_url, refreshed, "External refresh handled");
                    }
                    Ok(IndexEvent::Completed { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
