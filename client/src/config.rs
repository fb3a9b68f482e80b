//! World geometry, timing constants, and environment-driven settings.

use std::env;
use std::path::PathBuf;

/// Square tile edge in world pixels.
pub const TILE_SIZE: u32 = 16;

/// Background image width in pixels.
pub const MAP_WIDTH: u32 = 12864;
/// Background image height in pixels.
pub const MAP_HEIGHT: u32 = 6144;

/// Map width in tiles.
pub const MAP_TILES_X: i32 = (MAP_WIDTH / TILE_SIZE) as i32;
/// Map height in tiles.
pub const MAP_TILES_Y: i32 = (MAP_HEIGHT / TILE_SIZE) as i32;

/// Square chunk edge in pixels. The background splits into a 67 x 32 grid
/// of pre-cut chunk images.
pub const CHUNK_SIZE: u32 = 192;
/// Odd edge length of the streamed chunk window around the camera.
pub const VISIBLE_CHUNKS: i32 = 5;

/// Fixed simulation step in seconds.
pub const FIXED_TICK: f32 = 1.0 / 60.0;

/// Walking speed in tiles per second.
pub const MOVE_SPEED: f32 = 3.0;
/// Speed multiplier while the fast modifier is held. Remote players reuse it
/// to catch up when a new step arrives before the previous one finished.
pub const FAST_MULTIPLIER: f32 = 5.0;

/// How long a chat bubble stays above a player, in seconds.
pub const CHAT_BUBBLE_SECONDS: f32 = 5.0;

/// Placeholder id for the local player. The relay identifies us by our
/// connection, so this id never goes over the wire.
pub const LOCAL_PLAYER_ID: u64 = 0;

/// Spawn rectangle in tiles: x in [55, 67), y in [249, 252).
pub const SPAWN_X_MIN: i32 = 55;
pub const SPAWN_X_RANGE: i32 = 12;
pub const SPAWN_Y_MIN: i32 = 249;
pub const SPAWN_Y_RANGE: i32 = 3;

pub fn relay_url() -> String {
    env::var("RELAY_URL").unwrap_or_else(|_| "ws://127.0.0.1:3000/ws".to_string())
}

pub fn assets_dir() -> PathBuf {
    env::var("ASSETS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("assets"))
}

pub fn player_name() -> String {
    env::var("PLAYER_NAME").unwrap_or_else(|_| "wanderer".to_string())
}

pub fn sprite_index() -> u32 {
    env::var("SPRITE_INDEX")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_tile_and_chunk_grids_line_up() {
        assert_eq!(MAP_TILES_X, 804);
        assert_eq!(MAP_TILES_Y, 384);
        assert_eq!((MAP_WIDTH / CHUNK_SIZE) as i32, 67);
        assert_eq!((MAP_HEIGHT / CHUNK_SIZE) as i32, 32);
    }
}
