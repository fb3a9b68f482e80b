//! Grid-locked player entities with sub-tile interpolation.
//!
//! Every player, local or remote, runs the same state machine: Idle until a
//! step toward an adjacent tile is accepted, Moving while `progress` climbs
//! from 0 to 1, then Idle again on the target tile. All rendering, camera,
//! and network sync read positions through [`Player::position`], so motion
//! stays smooth regardless of where the step came from.

use crate::config;
use protocol::{ClientPacket, PlayerState};

/// Cardinal facing used to select a sprite row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facing {
    Left,
    Right,
    Up,
    Down,
}

/// A held movement intent. Steps are one tile at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

/// Facing for a displacement, dominant axis first, ties toward horizontal.
fn facing_for(dx: i32, dy: i32) -> Facing {
    if dx.abs() >= dy.abs() {
        if dx > 0 { Facing::Right } else { Facing::Left }
    } else if dy > 0 {
        Facing::Down
    } else {
        Facing::Up
    }
}

/// One player in the room.
///
/// `x, y` is the committed base tile; while a step is in flight the entity
/// occupies the line between base and `target`, parameterised by `progress`.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: u64,
    pub name: String,
    pub sprite_index: u32,
    pub x: i32,
    pub y: i32,
    target_x: i32,
    target_y: i32,
    moving: bool,
    progress: f32,
    facing: Facing,
    fast: bool,
    local: bool,
    chat_message: Option<String>,
    chat_remaining: f32,
}

impl Player {
    pub fn new(id: u64, x: i32, y: i32, name: String, sprite_index: u32) -> Self {
        Self {
            id,
            name,
            sprite_index,
            x,
            y,
            target_x: x,
            target_y: y,
            moving: false,
            progress: 0.0,
            facing: Facing::Down,
            fast: false,
            local: false,
            chat_message: None,
            chat_remaining: 0.0,
        }
    }

    pub fn from_state(state: &PlayerState) -> Self {
        Self::new(
            state.id,
            state.x,
            state.y,
            state.name.clone(),
            state.sprite_index,
        )
    }

    fn speed(&self) -> f32 {
        if self.fast {
            config::MOVE_SPEED * config::FAST_MULTIPLIER
        } else {
            config::MOVE_SPEED
        }
    }

    /// Advances one fixed tick. On completion the position snaps to the
    /// target and leftover progress is discarded, not carried into the next
    /// step.
    pub fn update(&mut self, dt: f32) {
        if self.moving {
            self.progress += self.speed() * dt;
            if self.progress >= 1.0 {
                self.x = self.target_x;
                self.y = self.target_y;
                self.moving = false;
                self.progress = 0.0;
            }
        }

        if self.chat_message.is_some() {
            self.chat_remaining -= dt;
            if self.chat_remaining <= 0.0 {
                self.chat_message = None;
            }
        }
    }

    /// Retargets interpolation toward the given tile. The base tile stays
    /// where it is, so a retarget mid-step restarts from the last committed
    /// tile. A zero displacement is a no-op.
    pub fn move_to(&mut self, new_x: i32, new_y: i32) {
        if !self.local {
            // A new step arriving before the previous one finished means the
            // sender is outpacing us; boost speed so the visual catches up
            // instead of teleporting.
            self.fast = self.moving || self.progress > 0.0;
        }

        let dx = new_x - self.x;
        let dy = new_y - self.y;
        if dx == 0 && dy == 0 {
            return;
        }

        self.target_x = new_x;
        self.target_y = new_y;
        self.moving = true;
        self.progress = 0.0;
        self.facing = facing_for(dx, dy);
    }

    /// Interpolated position in tile units, the single source of truth read
    /// by the camera, rendering, and outbound sync.
    pub fn position(&self) -> (f32, f32) {
        if self.moving {
            (
                self.x as f32 + (self.target_x - self.x) as f32 * self.progress,
                self.y as f32 + (self.target_y - self.y) as f32 * self.progress,
            )
        } else {
            (self.x as f32, self.y as f32)
        }
    }

    /// Sprite frame index: 0 when idle and briefly at both ends of a step,
    /// otherwise 1 or 2 picked by base-tile parity so neighbouring walkers
    /// do not animate in lockstep.
    pub fn walk_frame(&self) -> usize {
        if !self.moving || self.progress < 0.25 || self.progress > 0.75 {
            0
        } else {
            ((self.x + self.y).rem_euclid(2) + 1) as usize
        }
    }

    /// Shows a chat bubble; a new message resets the expiry timer.
    pub fn add_chat(&mut self, message: String) {
        self.chat_message = Some(message);
        self.chat_remaining = config::CHAT_BUBBLE_SECONDS;
    }

    pub fn chat_message(&self) -> Option<&str> {
        self.chat_message.as_deref()
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn target(&self) -> (i32, i32) {
        (self.target_x, self.target_y)
    }
}

/// The locally controlled player. Wraps the shared state machine with held
/// input, walkability checks, and the sync packets each accepted step owes
/// the relay.
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    pub player: Player,
    held: Option<Direction>,
}

impl LocalPlayer {
    pub fn new(x: i32, y: i32, name: String, sprite_index: u32) -> Self {
        let mut player = Player::new(config::LOCAL_PLAYER_ID, x, y, name, sprite_index);
        player.local = true;
        Self { player, held: None }
    }

    /// The packet announcing this player to the room.
    pub fn spawn_packet(&self) -> ClientPacket {
        ClientPacket::Spawn {
            x: self.player.x,
            y: self.player.y,
            name: self.player.name.clone(),
            sprite_index: self.player.sprite_index,
        }
    }

    pub fn press(&mut self, direction: Direction) {
        self.held = Some(direction);
    }

    /// Clears the held intent only if it is still the released one, so
    /// overlapping key presses resolve to the most recent direction.
    pub fn release(&mut self, direction: Direction) {
        if self.held == Some(direction) {
            self.held = None;
        }
    }

    pub fn set_fast(&mut self, fast: bool) {
        self.player.fast = fast;
    }

    /// Advances interpolation, then starts the next held step the moment the
    /// previous one completes, so holding a key walks continuously. Returns
    /// the sync packet when a step is accepted this tick.
    pub fn update(
        &mut self,
        dt: f32,
        walkable: impl Fn(i32, i32) -> bool,
    ) -> Option<ClientPacket> {
        self.player.update(dt);

        if self.player.moving {
            return None;
        }
        let direction = self.held?;
        self.step(direction, walkable)
    }

    fn step(
        &mut self,
        direction: Direction,
        walkable: impl Fn(i32, i32) -> bool,
    ) -> Option<ClientPacket> {
        let (dx, dy) = direction.delta();
        let new_x = self.player.x + dx;
        let new_y = self.player.y + dy;

        if !walkable(new_x, new_y) {
            // Blocked steps still turn the player toward the obstacle.
            self.player.facing = facing_for(dx, dy);
            return None;
        }

        self.player.move_to(new_x, new_y);
        Some(ClientPacket::Move { x: new_x, y: new_y })
    }

    /// Drops the player on a tile immediately, cancelling any step in
    /// flight, and returns the packet that resyncs the room.
    pub fn teleport(&mut self, x: i32, y: i32) -> ClientPacket {
        self.player.x = x;
        self.player.y = y;
        self.player.target_x = x;
        self.player.target_y = y;
        self.player.moving = false;
        self.player.progress = 0.0;
        ClientPacket::Move { x, y }
    }
}
