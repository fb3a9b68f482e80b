// Interface adapters: websocket handling and shared router state.

pub mod net;
pub mod state;
pub mod utils;
