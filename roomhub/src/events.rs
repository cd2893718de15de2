//! Publish/subscribe channel for events produced outside the room subsystem.
//!
//! The indexing pipeline publishes `IndexEvent::Completed` once an entry is
//! searchable; crawlers publish `ExternalRefreshRequested` when a source's
//! discussion context may have changed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexEvent {
    /// An entry finished indexing and can now be looked up.
    Completed { entry_id: String },
    /// Discussion context for a source URL should be re-fetched.
    ExternalRefreshRequested { source_url: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IndexEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: IndexEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                tracing::debug!("Index event published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.tx.subscribe()
    }
}
