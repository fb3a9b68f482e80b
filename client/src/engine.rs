//! The simulation engine: one cooperative loop tying movement, networking,
//! chunk streaming, and rendering together.
//!
//! The engine is the sole mutator of simulation state. Wall time flows into
//! an accumulator and drains in whole fixed ticks, so movement speed is
//! frame-rate independent; the camera and chunk window are recomputed once
//! per frame after ticks drain. Inbound packets are applied at the top of
//! each frame, which interleaves safely because interpolation reads are
//! idempotent.

use std::sync::Arc;

use image::RgbaImage;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use protocol::{ClientPacket, PlayerState, ServerPacket};

use crate::chunks::{ChunkKey, ChunkManager, ChunkSource};
use crate::collision::CollisionMap;
use crate::config;
use crate::net::Connection;
use crate::player::{Direction, LocalPlayer, Player};
use crate::progress::{LoadProgress, ProgressSnapshot};
use crate::sprites::{SpriteBank, SpriteSource};

/// Viewport centered on the followed entity, in world pixels.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub center_x: f32,
    pub center_y: f32,
    pub view_width: f32,
    pub view_height: f32,
}

impl Camera {
    /// Top-left corner of the viewport.
    pub fn origin(&self) -> (f32, f32) {
        (
            self.center_x - self.view_width / 2.0,
            self.center_y - self.view_height / 2.0,
        )
    }
}

/// One draw command; consumers blit in list order.
pub enum DrawOp<'a> {
    Chunk {
        /// Pixel position of the chunk's top-left corner.
        origin: (i32, i32),
        image: &'a RgbaImage,
    },
    Player {
        id: u64,
        /// Interpolated position in world pixels.
        position: (f32, f32),
        sprite: &'a RgbaImage,
        name: &'a str,
        chat: Option<&'a str>,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub name: String,
    pub sprite_index: u32,
    pub view_width: f32,
    pub view_height: f32,
}

pub struct Engine {
    local: LocalPlayer,
    remotes: Vec<Player>,
    collision: CollisionMap,
    chunks: ChunkManager,
    sprites: SpriteBank,
    camera: Camera,
    accumulator: f32,
    progress: LoadProgress,
    inbound_rx: mpsc::Receiver<ServerPacket>,
    outbound_tx: mpsc::Sender<ClientPacket>,
    pump: Option<JoinHandle<()>>,
}

impl Engine {
    /// Spawns the local player on a random tile of the spawn rectangle and
    /// announces it to the room.
    pub fn new(
        conn: Connection,
        collision: CollisionMap,
        chunk_source: Arc<dyn ChunkSource>,
        sprite_source: Arc<dyn SpriteSource>,
        progress: LoadProgress,
        cfg: EngineConfig,
    ) -> Self {
        let Connection {
            inbound_rx,
            outbound_tx,
            pump,
        } = conn;

        let mut rng = rand::rng();
        let spawn_x = config::SPAWN_X_MIN + rng.random_range(0..config::SPAWN_X_RANGE);
        let spawn_y = config::SPAWN_Y_MIN + rng.random_range(0..config::SPAWN_Y_RANGE);
        let local = LocalPlayer::new(spawn_x, spawn_y, cfg.name, cfg.sprite_index);

        let mut sprites = SpriteBank::new(sprite_source);
        sprites.begin(config::LOCAL_PLAYER_ID, cfg.sprite_index);

        let (x, y) = local.player.position();
        let engine = Self {
            local,
            remotes: Vec::new(),
            collision,
            chunks: ChunkManager::new(chunk_source),
            sprites,
            camera: Camera {
                center_x: x * config::TILE_SIZE as f32,
                center_y: y * config::TILE_SIZE as f32,
                view_width: cfg.view_width,
                view_height: cfg.view_height,
            },
            accumulator: 0.0,
            progress,
            inbound_rx,
            outbound_tx,
            pump: Some(pump),
        };

        engine.send(engine.local.spawn_packet());
        info!(x = spawn_x, y = spawn_y, "spawned into the room");
        engine
    }

    /// One frame: apply inbound packets, drain whole fixed ticks from the
    /// accumulator (carrying the remainder), then recompute the camera and
    /// the chunk window once.
    pub fn advance(&mut self, dt: f32) {
        self.apply_inbound();

        self.accumulator += dt;
        while self.accumulator >= config::FIXED_TICK {
            self.fixed_tick(config::FIXED_TICK);
            self.accumulator -= config::FIXED_TICK;
        }

        let (x, y) = self.local.player.position();
        self.camera.center_x = x * config::TILE_SIZE as f32;
        self.camera.center_y = y * config::TILE_SIZE as f32;

        self.sprites.apply_completions();
        self.chunks.update(self.camera.center_x, self.camera.center_y);
        self.progress.set_chunks(self.chunks.progress());
    }

    fn fixed_tick(&mut self, dt: f32) {
        let collision = &self.collision;
        let remotes = &self.remotes;
        let packet = self.local.update(dt, |x, y| {
            // Walkable means on passable ground and not under another
            // player's feet.
            collision.is_walkable(x, y) && !remotes.iter().any(|p| p.x == x && p.y == y)
        });
        if let Some(packet) = packet {
            self.send(packet);
        }

        for remote in &mut self.remotes {
            remote.update(dt);
        }
    }

    fn apply_inbound(&mut self) {
        while let Ok(packet) = self.inbound_rx.try_recv() {
            self.apply_packet(packet);
        }
    }

    fn apply_packet(&mut self, packet: ServerPacket) {
        match packet {
            ServerPacket::Init { players } => {
                self.sprites.retain(|id| {
                    id == config::LOCAL_PLAYER_ID || players.iter().any(|p| p.id == id)
                });
                for player in &players {
                    if !self.sprites.contains(player.id) {
                        self.sprites.begin(player.id, player.sprite_index);
                    }
                }
                self.remotes = players.iter().map(Player::from_state).collect();
            }
            ServerPacket::Spawn { player } => self.upsert_remote(player),
            ServerPacket::Move { id, x, y } => {
                // A Move racing ahead of its Spawn is dropped; the next
                // snapshot or step will place the player.
                if let Some(remote) = self.remotes.iter_mut().find(|p| p.id == id) {
                    remote.move_to(x, y);
                }
            }
            ServerPacket::Remove { id } => {
                self.remotes.retain(|p| p.id != id);
                self.sprites.forget(id);
            }
            ServerPacket::Chat { id, message } => {
                if let Some(remote) = self.remotes.iter_mut().find(|p| p.id == id) {
                    remote.add_chat(message);
                }
            }
        }
    }

    /// The snapshot sent at join can overlap frames published while it was
    /// in flight, so a Spawn for a tracked id replaces that entry.
    fn upsert_remote(&mut self, state: PlayerState) {
        if !self.sprites.contains(state.id) {
            self.sprites.begin(state.id, state.sprite_index);
        }
        let incoming = Player::from_state(&state);
        match self.remotes.iter_mut().find(|p| p.id == state.id) {
            Some(existing) => *existing = incoming,
            None => self.remotes.push(incoming),
        }
    }

    fn send(&self, packet: ClientPacket) {
        match self.outbound_tx.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound queue full; dropping packet");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("connection gone; dropping packet");
            }
        }
    }

    pub fn press(&mut self, direction: Direction) {
        self.local.press(direction);
    }

    pub fn release(&mut self, direction: Direction) {
        self.local.release(direction);
    }

    pub fn set_fast(&mut self, fast: bool) {
        self.local.set_fast(fast);
    }

    /// Shows the message above the local player and relays it to the room.
    pub fn send_chat(&mut self, message: String) {
        self.local.player.add_chat(message.clone());
        self.send(ClientPacket::Chat { message });
    }

    /// Drops the local player on a tile and resyncs the room.
    pub fn teleport(&mut self, x: i32, y: i32) {
        let packet = self.local.teleport(x, y);
        self.send(packet);
    }

    /// Builds the frame's draw list: resident chunks under the viewport in
    /// row-major order, then remote players in insertion order, then the
    /// local player on top. Missing chunks and still-loading sprites are
    /// skipped; absence never blocks a frame.
    pub fn render(&mut self) -> Vec<DrawOp<'_>> {
        self.progress.mark_first_frame();

        let mut ops = Vec::new();

        let (origin_x, origin_y) = self.camera.origin();
        let first = ChunkKey::from_pixels(origin_x, origin_y);
        let last = ChunkKey::from_pixels(
            origin_x + self.camera.view_width,
            origin_y + self.camera.view_height,
        );
        for cy in first.cy..=last.cy {
            for cx in first.cx..=last.cx {
                let key = ChunkKey { cx, cy };
                if let Some(image) = self.chunks.get(key) {
                    ops.push(DrawOp::Chunk {
                        origin: key.pixel_origin(),
                        image,
                    });
                }
            }
        }

        for remote in &self.remotes {
            if let Some(op) = player_op(remote, &self.sprites) {
                ops.push(op);
            }
        }
        if let Some(op) = player_op(&self.local.player, &self.sprites) {
            ops.push(op);
        }

        ops
    }

    /// Stops the socket pump so a discarded engine leaves nothing running.
    pub fn shutdown(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    pub fn local(&self) -> &Player {
        &self.local.player
    }

    pub fn remotes(&self) -> &[Player] {
        &self.remotes
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn player_op<'a>(player: &'a Player, sprites: &'a SpriteBank) -> Option<DrawOp<'a>> {
    let set = sprites.get(player.id)?;
    let (x, y) = player.position();
    Some(DrawOp::Player {
        id: player.id,
        position: (x * config::TILE_SIZE as f32, y * config::TILE_SIZE as f32),
        sprite: set.frame(player.facing(), player.walk_frame()),
        name: &player.name,
        chat: player.chat_message(),
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::chunks::ChunkError;
    use crate::net;
    use crate::sprites::{FetchDirection, SpriteError};

    use super::*;

    struct InstantChunks;

    #[async_trait]
    impl ChunkSource for InstantChunks {
        async fn load(&self, _key: ChunkKey) -> Result<RgbaImage, ChunkError> {
            Ok(RgbaImage::new(1, 1))
        }
    }

    struct InstantSprites;

    #[async_trait]
    impl SpriteSource for InstantSprites {
        async fn load(
            &self,
            _sprite_index: u32,
            _direction: FetchDirection,
            _frame: usize,
        ) -> Result<RgbaImage, SpriteError> {
            Ok(RgbaImage::new(2, 2))
        }
    }

    fn test_engine() -> (
        Engine,
        mpsc::Sender<ServerPacket>,
        mpsc::Receiver<ClientPacket>,
    ) {
        let (conn, inbound_tx, outbound_rx) = net::loopback();
        let (progress, _watch) = LoadProgress::new();
        let engine = Engine::new(
            conn,
            CollisionMap::all_passable(),
            Arc::new(InstantChunks),
            Arc::new(InstantSprites),
            progress,
            EngineConfig {
                name: "pilot".to_string(),
                sprite_index: 1,
                view_width: 320.0,
                view_height: 240.0,
            },
        );
        (engine, inbound_tx, outbound_rx)
    }

    fn state(id: u64, x: i32, y: i32) -> PlayerState {
        PlayerState {
            id,
            name: format!("p{id}"),
            sprite_index: 2,
            x,
            y,
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn construction_announces_the_spawn() {
        let (engine, _inbound, mut outbound) = test_engine();

        match outbound.try_recv().unwrap() {
            ClientPacket::Spawn {
                x,
                y,
                name,
                sprite_index,
            } => {
                assert!((config::SPAWN_X_MIN..config::SPAWN_X_MIN + config::SPAWN_X_RANGE)
                    .contains(&x));
                assert!((config::SPAWN_Y_MIN..config::SPAWN_Y_MIN + config::SPAWN_Y_RANGE)
                    .contains(&y));
                assert_eq!(name, "pilot");
                assert_eq!(sprite_index, 1);
            }
            other => panic!("unexpected packet: {other:?}"),
        }
        assert!(!engine.local().is_moving());
    }

    #[tokio::test]
    async fn accumulator_drains_whole_ticks_and_carries_the_remainder() {
        let (mut engine, _inbound, _outbound) = test_engine();
        engine.press(Direction::Right);

        engine.advance(config::FIXED_TICK * 2.5);
        // Tick one started the step, tick two advanced it once.
        let one_tick = config::MOVE_SPEED * config::FIXED_TICK;
        assert_eq!(engine.local().progress(), one_tick);

        // Three quarters of a tick alone would not tick; with the carried
        // half tick it does, exactly once.
        engine.advance(config::FIXED_TICK * 0.75);
        assert_eq!(engine.local().progress(), one_tick + one_tick);
    }

    #[tokio::test]
    async fn camera_follows_the_interpolated_position() {
        let (mut engine, _inbound, _outbound) = test_engine();
        engine.press(Direction::Right);
        engine.advance(config::FIXED_TICK * 3.0);

        let (x, y) = engine.local().position();
        let camera = engine.camera();
        assert_eq!(camera.center_x, x * config::TILE_SIZE as f32);
        assert_eq!(camera.center_y, y * config::TILE_SIZE as f32);
        assert!(engine.local().is_moving());
    }

    #[tokio::test]
    async fn init_replaces_the_cast_wholesale() {
        let (mut engine, inbound, _outbound) = test_engine();

        inbound
            .send(ServerPacket::Init {
                players: vec![state(11, 1, 1), state(12, 2, 2)],
            })
            .await
            .unwrap();
        engine.advance(0.0);
        assert_eq!(engine.remotes().len(), 2);

        inbound
            .send(ServerPacket::Init {
                players: vec![state(12, 9, 9)],
            })
            .await
            .unwrap();
        engine.advance(0.0);

        assert_eq!(engine.remotes().len(), 1);
        assert_eq!(engine.remotes()[0].id, 12);
        assert_eq!((engine.remotes()[0].x, engine.remotes()[0].y), (9, 9));
    }

    #[tokio::test]
    async fn spawn_is_an_upsert_keyed_by_id() {
        let (mut engine, inbound, _outbound) = test_engine();

        for (x, y) in [(3, 3), (8, 4)] {
            inbound
                .send(ServerPacket::Spawn {
                    player: state(21, x, y),
                })
                .await
                .unwrap();
        }
        engine.advance(0.0);

        assert_eq!(engine.remotes().len(), 1);
        assert_eq!((engine.remotes()[0].x, engine.remotes()[0].y), (8, 4));
    }

    #[tokio::test]
    async fn moves_for_unknown_ids_are_dropped() {
        let (mut engine, inbound, _outbound) = test_engine();

        inbound
            .send(ServerPacket::Move { id: 99, x: 5, y: 5 })
            .await
            .unwrap();
        engine.advance(0.0);

        assert!(engine.remotes().is_empty());
    }

    #[tokio::test]
    async fn moves_drive_remote_interpolation() {
        let (mut engine, inbound, _outbound) = test_engine();

        inbound
            .send(ServerPacket::Spawn {
                player: state(31, 5, 5),
            })
            .await
            .unwrap();
        inbound
            .send(ServerPacket::Move { id: 31, x: 6, y: 5 })
            .await
            .unwrap();
        engine.advance(config::FIXED_TICK);

        let remote = &engine.remotes()[0];
        assert!(remote.is_moving());
        assert_eq!(remote.target(), (6, 5));
    }

    #[tokio::test]
    async fn remove_forgets_the_player() {
        let (mut engine, inbound, _outbound) = test_engine();

        inbound
            .send(ServerPacket::Spawn {
                player: state(41, 5, 5),
            })
            .await
            .unwrap();
        engine.advance(0.0);
        assert_eq!(engine.remotes().len(), 1);

        inbound.send(ServerPacket::Remove { id: 41 }).await.unwrap();
        engine.advance(0.0);
        assert!(engine.remotes().is_empty());
    }

    #[tokio::test]
    async fn chat_packets_raise_the_right_bubble() {
        let (mut engine, inbound, _outbound) = test_engine();

        inbound
            .send(ServerPacket::Spawn {
                player: state(51, 5, 5),
            })
            .await
            .unwrap();
        inbound
            .send(ServerPacket::Chat {
                id: 51,
                message: "over here".to_string(),
            })
            .await
            .unwrap();
        engine.advance(0.0);

        assert_eq!(engine.remotes()[0].chat_message(), Some("over here"));
        assert_eq!(engine.local().chat_message(), None);
    }

    #[tokio::test]
    async fn send_chat_bubbles_locally_and_relays() {
        let (mut engine, _inbound, mut outbound) = test_engine();
        outbound.try_recv().unwrap(); // spawn

        engine.send_chat("hello".to_string());

        assert_eq!(engine.local().chat_message(), Some("hello"));
        assert!(matches!(
            outbound.try_recv().unwrap(),
            ClientPacket::Chat { message } if message == "hello"
        ));
    }

    #[tokio::test]
    async fn tiles_under_remote_players_are_not_walkable() {
        let (mut engine, inbound, mut outbound) = test_engine();
        outbound.try_recv().unwrap(); // spawn

        let (x, y) = (engine.local().x, engine.local().y);
        inbound
            .send(ServerPacket::Spawn {
                player: state(61, x + 1, y),
            })
            .await
            .unwrap();
        engine.advance(0.0);

        engine.press(Direction::Right);
        engine.advance(config::FIXED_TICK);

        assert!(!engine.local().is_moving());
        assert_eq!((engine.local().x, engine.local().y), (x, y));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn teleport_resyncs_the_room() {
        let (mut engine, _inbound, mut outbound) = test_engine();
        outbound.try_recv().unwrap(); // spawn

        engine.teleport(100, 200);

        assert_eq!(engine.local().position(), (100.0, 200.0));
        assert!(matches!(
            outbound.try_recv().unwrap(),
            ClientPacket::Move { x: 100, y: 200 }
        ));
    }

    #[tokio::test]
    async fn draw_list_layers_chunks_then_remotes_then_local() {
        let (mut engine, inbound, _outbound) = test_engine();
        inbound
            .send(ServerPacket::Spawn {
                player: state(71, engine.local().x + 2, engine.local().y),
            })
            .await
            .unwrap();

        // Sprites and chunks are still loading: the first frame has chunks
        // requested but nothing to draw for players.
        engine.advance(0.0);
        assert!(engine.render().is_empty());

        settle().await;
        engine.advance(0.0);
        let ops = engine.render();

        let kinds: Vec<u8> = ops
            .iter()
            .map(|op| match op {
                DrawOp::Chunk { .. } => 0,
                DrawOp::Player { .. } => 1,
            })
            .collect();
        assert!(kinds.first() == Some(&0));
        assert!(kinds.windows(2).all(|w| w[0] <= w[1]));

        let player_ids: Vec<u64> = ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Player { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(player_ids, vec![71, config::LOCAL_PLAYER_ID]);
    }

    #[tokio::test]
    async fn first_render_flips_the_progress_flag() {
        let (mut engine, _inbound, _outbound) = test_engine();
        assert!(!engine.progress().first_frame_rendered);

        engine.advance(0.0);
        engine.render();

        assert!(engine.progress().first_frame_rendered);
        assert!(!engine.progress().loaded());

        settle().await;
        engine.advance(0.0);
        assert_eq!(engine.progress().chunks, 100);
    }

    #[tokio::test]
    async fn shutdown_stops_the_pump() {
        let (mut engine, _inbound, _outbound) = test_engine();
        engine.shutdown();
        assert!(engine.pump.is_none());
    }
}
