// Use cases layer: the room fan-out workflow.

pub mod room;

pub use room::{RoomEvent, RoomFrame, RoomHandle, room_task};
