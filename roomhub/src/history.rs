//! On-disk history snapshots for durable (topic) rooms.
//!
//! One JSON array of `RoomMessage` per room, keyed by a sanitized room id and
//! rewritten in full after every broadcast. Each room owns one
//! `HistoryWriter`, so writes for a room land on disk in the order the room
//! produced them; snapshots queued while a write is in flight collapse into
//! the newest one.

use shared_types::RoomMessage;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long a stopping room waits for its last snapshot to land.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, room_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_room_id(room_id)))
    }

    /// Read a room's snapshot. A missing file is an empty history.
    pub async fn load(&self, room_id: &str) -> Result<Vec<RoomMessage>, HistoryError> {
        let path = self.path_for(room_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Overwrite a room's snapshot.
    pub async fn save(&self, room_id: &str, messages: &[RoomMessage]) -> Result<(), HistoryError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(messages)?;
        let path = self.path_for(room_id);
        let tmp = path.with_extension(format!("{}.tmp", ulid::Ulid::new()));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Single background writer for one room's snapshots.
///
/// `submit` never blocks the room; the writer task always persists the latest
/// snapshot it has been given, one write at a time.
pub struct HistoryWriter {
    room_id: String,
    tx: watch::Sender<Vec<RoomMessage>>,
    task: JoinHandle<()>,
}

impl HistoryWriter {
    pub fn spawn(store: HistoryStore, room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        let (tx, mut rx) = watch::channel(Vec::new());
        let task_room = room_id.clone();
        let task = tokio::spawn(async move {
            // Ok while a snapshot is unseen, even after the sender is gone.
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                if let Err(e) = store.save(&task_room, &snapshot).await {
                    tracing::warn!(room_id = %task_room, error = %e, "Failed to persist room history");
                }
            }
        });
        Self { room_id, tx, task }
    }

    pub fn submit(&self, snapshot: Vec<RoomMessage>) {
        self.tx.send_replace(snapshot);
    }

    /// Stop accepting snapshots and wait for the pending one to be written.
    pub async fn close(self) {
        let Self { room_id, tx, task } = self;
        drop(tx);
        match tokio::time::timeout(FLUSH_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(room_id = %room_id, error = %e, "History writer panicked"),
            Err(_) => tracing::warn!(room_id = %room_id, "History flush timed out"),
        }
    }
}

/// Map a room id onto a safe file stem: alphanumerics, `-` and `_` survive.
pub fn sanitize_room_id(room_id: &str) -> String {
    let cleaned: String = room_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
