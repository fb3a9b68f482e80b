//! Client engine for the exploration world: grid movement with sub-tile
//! interpolation, viewport-driven chunk streaming, sprite loading, and the
//! websocket link to the relay. The binary drives it headlessly; a renderer
//! embeds it by consuming [`engine::Engine::render`] draw lists.

pub mod chunks;
pub mod collision;
pub mod config;
pub mod engine;
pub mod net;
pub mod player;
pub mod progress;
pub mod sprites;
