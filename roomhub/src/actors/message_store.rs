//! Bounded ring of a room's most recent messages.
//!
//! Has no synchronization of its own; the owning room actor is the only writer.

use shared_types::RoomMessage;
use std::collections::VecDeque;

/// Number of messages a room keeps in memory (and on disk for durable rooms).
pub const ROOM_MESSAGE_CAPACITY: usize = 20;

#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: VecDeque<RoomMessage>,
    capacity: usize,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::with_capacity(ROOM_MESSAGE_CAPACITY)
    }
}

impl MessageStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Seed from a persisted snapshot, keeping only the newest `capacity` entries.
    pub fn from_history(history: Vec<RoomMessage>) -> Self {
        let mut store = Self::default();
        for message in history {
            store.push(message);
        }
        store
    }

    /// Append, evicting the oldest message when full.
    pub fn push(&mut self, message: RoomMessage) {
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoomMessage> {
        self.messages.iter()
    }

    /// Full copy in arrival order.
    pub fn snapshot(&self) -> Vec<RoomMessage> {
        self.messages.iter().cloned().collect()
    }
}
