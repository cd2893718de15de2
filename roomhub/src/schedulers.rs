//! Background schedulers: the idle-room reaper and the ambient greeter.

use chrono::{DateTime, Utc};
use shared_types::RoomMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::actors::room::{RoomHandle, RoomStatus};
use crate::assistant::AssistantPipeline;
use crate::config::RoomTimings;
use crate::registry::RoomRegistry;

/// Time since `then`; zero if `then` is in the future.
fn elapsed(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or_default()
}

// ============================================================================
// Reaper
// ============================================================================

/// Retire rooms with nobody in them for longer than the idle window.
///
/// Returns the ids removed from the registry. Rooms whose shutdown is already
/// pending are left for a later sweep.
pub async fn reap_idle_rooms(registry: &RoomRegistry, now: DateTime<Utc>) -> Vec<String> {
    let idle_limit = registry.timings().reaper_idle;
    let mut reaped = Vec::new();

    for room in registry.rooms().await {
        let status = room.status();
        if status.participant_count > 0 {
            continue;
        }
        let idle = elapsed(now, status.last_activity_at);
        let retire = if status.shut_down {
            true
        } else if idle > idle_limit {
            room.request_shutdown()
        } else {
            false
        };
        if retire && registry.remove(&room).await {
            tracing::info!(room_id = %room.id(), idle_secs = idle.as_secs(), "Reaped idle room");
            reaped.push(room.id().to_string());
        }
    }
    reaped
}

pub fn spawn_reaper(registry: RoomRegistry) -> JoinHandle<()> {
    let tick = registry.timings().reaper_tick;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = reap_idle_rooms(&registry, Utc::now()).await;
            if !reaped.is_empty() {
                tracing::debug!(count = reaped.len(), "Reaper sweep finished");
            }
        }
    })
}

// ============================================================================
// Greeter
// ============================================================================

/// First-greeting policy for a quiet topic room.
///
/// `last_attempt` is the greeter's own last try, so a failing model is not
/// retried on every tick.
pub fn should_greet(
    status: &RoomStatus,
    now: DateTime<Utc>,
    timings: &RoomTimings,
    last_attempt: Option<DateTime<Utc>>,
) -> bool {
    if status.shut_down || status.participant_count == 0 || status.message_count > 0 {
        return false;
    }
    if elapsed(now, status.last_activity_at) <= timings.greeter_room_quiet {
        return false;
    }
    let last_assistant = match (status.last_assistant_reply_at, last_attempt) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    last_assistant.map_or(true, |at| {
        elapsed(now, at) > timings.greeter_assistant_quiet
    })
}

/// Tick for one topic room until it shuts down.
pub fn spawn_greeter(
    room: RoomHandle,
    assistant: Arc<AssistantPipeline>,
    timings: RoomTimings,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timings.greeter_tick);
        ticker.tick().await;
        let mut last_attempt: Option<DateTime<Utc>> = None;

        loop {
            ticker.tick().await;
            if room.is_shut_down() {
                break;
            }
            let status = room.status();
            let now = Utc::now();
            if !should_greet(&status, now, &timings, last_attempt) {
                continue;
            }

            last_attempt = Some(now);
            match assistant.greet(&status.context).await {
                Ok(greeting) => {
                    tracing::info!(room_id = %room.id(), "Ambient greeting sent");
                    let message = RoomMessage::assistant(assistant.identity(), greeting);
                    if room.broadcast(message).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(room_id = %room.id(), error = %e, "Ambient greeting failed");
                }
            }
        }
        tracing::debug!(room_id = %room.id(), "Greeter stopped");
    })
}
