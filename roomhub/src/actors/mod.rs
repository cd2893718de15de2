//! Actors owned by the room subsystem.

pub mod message_store;
pub mod room;

pub use room::{
    ClientConnection, Outbound, RoomActor, RoomArguments, RoomContext, RoomError, RoomHandle,
    RoomMsg, RoomStatus,
};
