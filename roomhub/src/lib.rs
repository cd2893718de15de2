//! RoomHub - real-time discussion rooms with a retrieval-augmented assistant
//!
//! Each room is a ractor actor that owns its participants and its last 20
//! messages. The registry creates rooms on demand; the websocket and HTTP
//! routes in `api` translate connections into room operations.

pub mod actors;
pub mod api;
pub mod app_state;
pub mod assistant;
pub mod collaborators;
pub mod config;
pub mod events;
pub mod history;
pub mod llm;
pub mod registry;
pub mod schedulers;
