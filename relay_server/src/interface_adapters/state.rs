use crate::use_cases::RoomHandle;

#[derive(Clone)]
pub struct AppState {
    // The single deployment-wide room every socket attaches to.
    pub room: RoomHandle,
}
