//! Topic history persistence across restarts
//!
//! Topic rooms snapshot their history to disk after every message and reload
//! it when recreated; item rooms never touch the disk. Bursts of messages
//! must leave the newest snapshot on disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use roomhub::app_state::{AppState, Collaborators};
use roomhub::collaborators::{DisabledModel, HttpPageFetcher, InMemoryIndex};
use roomhub::config::ServerConfig;
use roomhub::history::HistoryStore;
use shared_types::RoomMessage;

fn app_state_in(dir: &Path) -> AppState {
    let config = ServerConfig {
        data_dir: dir.to_path_buf(),
        ..ServerConfig::default()
    };
    AppState::new(
        config,
        Collaborators::new(
            Arc::new(InMemoryIndex::new()),
            Arc::new(DisabledModel),
            Arc::new(HttpPageFetcher::new().expect("Failed to build fetcher")),
        ),
    )
}

async fn wait_for_last(store: &HistoryStore, room_id: &str, content: &str) -> Vec<RoomMessage> {
    for _ in 0..100 {
        if let Ok(messages) = store.load(room_id).await {
            if messages.last().is_some_and(|m| m.content == content) {
                return messages;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("history for {room_id} never ended with {content:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_topic_history_survives_restart() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

    let first = app_state_in(temp_dir.path());
    let room = first.registry().get_or_create("topic_Dev").await.unwrap();
    room.broadcast(RoomMessage::user("ada", "shipping v2 today"))
        .unwrap();
    for i in 0..25 {
        room.broadcast(RoomMessage::user("bob", format!("reply {i}")))
            .unwrap();
    }
    room.broadcast(RoomMessage::assistant("micro", "Congrats on the release."))
        .unwrap();
    let live = room.history().await.unwrap();
    first.registry().shutdown_all().await;

    let second = app_state_in(temp_dir.path());
    let room = second.registry().get_or_create("topic_Dev").await.unwrap();
    let history = room.history().await.unwrap();

    assert_eq!(history.len(), 20);
    assert_eq!(history, live);
    assert_eq!(history[0].content, "reply 6");
    assert!(history[19].is_assistant);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_settled_snapshot_matches_live_history() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = HistoryStore::new(temp_dir.path());

    let state = app_state_in(temp_dir.path());
    let room = state.registry().get_or_create("topic_General").await.unwrap();
    for i in 0..30 {
        room.broadcast(RoomMessage::user("ada", format!("m{i}")))
            .unwrap();
    }
    let live = room.history().await.unwrap();

    let mut saved = wait_for_last(&store, "topic_General", "m29").await;
    // Nothing older may land afterwards.
    tokio::time::sleep(Duration::from_millis(200)).await;
    saved = store.load("topic_General").await.unwrap_or(saved);
    assert_eq!(saved, live);
}

#[tokio::test]
async fn test_chat_alias_persists_as_topic() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = HistoryStore::new(temp_dir.path());

    let state = app_state_in(temp_dir.path());
    let room = state.registry().get_or_create("chat_Markets").await.unwrap();
    room.broadcast(RoomMessage::user("bob", "gold is up")).unwrap();
    state.registry().shutdown_all().await;

    let saved = store.load("topic_Markets").await.unwrap();
    assert_eq!(saved[0].content, "gold is up");
    assert!(!store.path_for("chat_Markets").exists());

    let restarted = app_state_in(temp_dir.path());
    let room = restarted
        .registry()
        .get_or_create("chat_Markets")
        .await
        .unwrap();
    assert_eq!(room.history().await.unwrap()[0].content, "gold is up");
}

#[tokio::test]
async fn test_item_rooms_are_not_persisted() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = HistoryStore::new(temp_dir.path());

    let first = app_state_in(temp_dir.path());
    let room = first.registry().get_or_create("news_5").await.unwrap();
    room.broadcast(RoomMessage::user("ada", "breaking")).unwrap();
    assert_eq!(room.history().await.unwrap().len(), 1);
    first.registry().shutdown_all().await;

    assert!(!store.path_for("news_5").exists());
    let second = app_state_in(temp_dir.path());
    let room = second.registry().get_or_create("news_5").await.unwrap();
    assert!(room.history().await.unwrap().is_empty());
}
