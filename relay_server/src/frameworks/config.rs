use std::env;

// Runtime/server constants (not gameplay tuning).

pub fn http_port() -> u16 {
    env::var("RELAY_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
}

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const FANOUT_BROADCAST_CAPACITY: usize = 256;
