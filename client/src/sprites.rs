//! Character sprite loading.
//!
//! Each character set is nine images on disk: idle plus two walk frames for
//! the left, up, and down rows. The right row is synthesized by mirroring
//! the left row once all fetches land. Loading per entity is an explicit
//! state machine advanced from the engine loop, never a shared counter
//! mutated by racing callbacks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use image::{RgbaImage, imageops};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::player::Facing;

/// Frame file suffixes: idle, then the two walk frames.
pub const FRAME_SUFFIXES: [&str; 3] = ["", "_1", "_2"];
/// Fetches per character set.
pub const TOTAL_FETCHES: usize = 9;

/// Directions that exist on disk; right is derived from left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchDirection {
    Left,
    Up,
    Down,
}

impl FetchDirection {
    pub const ALL: [FetchDirection; 3] =
        [FetchDirection::Left, FetchDirection::Up, FetchDirection::Down];

    fn file_stem(self) -> &'static str {
        match self {
            FetchDirection::Left => "left",
            FetchDirection::Up => "up",
            FetchDirection::Down => "down",
        }
    }
}

#[derive(Debug, Error)]
pub enum SpriteError {
    #[error("failed to read sprite image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode sprite image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Asynchronous supplier of individual sprite frames.
#[async_trait]
pub trait SpriteSource: Send + Sync + 'static {
    async fn load(
        &self,
        sprite_index: u32,
        direction: FetchDirection,
        frame: usize,
    ) -> Result<RgbaImage, SpriteError>;
}

/// Reads `player{n}/{direction}{suffix}.png` frames from an asset directory.
pub struct DirSpriteSource {
    root: PathBuf,
}

impl DirSpriteSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn frame_path(&self, sprite_index: u32, direction: FetchDirection, frame: usize) -> PathBuf {
        self.root
            .join("sprites")
            .join(format!("player{sprite_index}"))
            .join(format!("{}{}.png", direction.file_stem(), FRAME_SUFFIXES[frame]))
    }
}

#[async_trait]
impl SpriteSource for DirSpriteSource {
    async fn load(
        &self,
        sprite_index: u32,
        direction: FetchDirection,
        frame: usize,
    ) -> Result<RgbaImage, SpriteError> {
        let bytes = tokio::fs::read(self.frame_path(sprite_index, direction, frame)).await?;
        let img = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)?;
        Ok(img.into_rgba8())
    }
}

/// A fully loaded character set, one row per facing.
#[derive(Debug, Clone)]
pub struct SpriteSet {
    left: [RgbaImage; 3],
    right: [RgbaImage; 3],
    up: [RgbaImage; 3],
    down: [RgbaImage; 3],
}

impl SpriteSet {
    pub fn frame(&self, facing: Facing, frame: usize) -> &RgbaImage {
        let row = match facing {
            Facing::Left => &self.left,
            Facing::Right => &self.right,
            Facing::Up => &self.up,
            Facing::Down => &self.down,
        };
        &row[frame.min(2)]
    }
}

/// Frames collected so far for one entity.
#[derive(Debug, Default)]
struct PartialSet {
    left: [Option<RgbaImage>; 3],
    up: [Option<RgbaImage>; 3],
    down: [Option<RgbaImage>; 3],
    loaded: usize,
}

impl PartialSet {
    fn insert(&mut self, direction: FetchDirection, frame: usize, image: RgbaImage) {
        let slot = match direction {
            FetchDirection::Left => &mut self.left[frame],
            FetchDirection::Up => &mut self.up[frame],
            FetchDirection::Down => &mut self.down[frame],
        };
        if slot.replace(image).is_none() {
            self.loaded += 1;
        }
    }

    fn into_set(self) -> Option<SpriteSet> {
        let PartialSet {
            left: [Some(l0), Some(l1), Some(l2)],
            up: [Some(u0), Some(u1), Some(u2)],
            down: [Some(d0), Some(d1), Some(d2)],
            ..
        } = self
        else {
            return None;
        };

        let right = [
            imageops::flip_horizontal(&l0),
            imageops::flip_horizontal(&l1),
            imageops::flip_horizontal(&l2),
        ];
        Some(SpriteSet {
            left: [l0, l1, l2],
            right,
            up: [u0, u1, u2],
            down: [d0, d1, d2],
        })
    }
}

/// Load state for one entity's character set. An entity missing from the
/// bank entirely has not started loading.
#[derive(Debug)]
enum SpriteLoad {
    Loading { generation: u64, partial: PartialSet },
    Ready(SpriteSet),
    /// One frame failed; the entity stays invisible rather than rendering a
    /// broken set.
    Failed,
}

struct Completion {
    entity_id: u64,
    generation: u64,
    direction: FetchDirection,
    frame: usize,
    result: Result<RgbaImage, SpriteError>,
}

/// Tracks sprite sets for every entity in the room.
///
/// Fetches run on spawned tasks; their completions are applied only from
/// [`SpriteBank::apply_completions`] on the engine's logical thread.
pub struct SpriteBank {
    source: Arc<dyn SpriteSource>,
    states: HashMap<u64, SpriteLoad>,
    generation: u64,
    done_tx: mpsc::Sender<Completion>,
    done_rx: mpsc::Receiver<Completion>,
}

impl SpriteBank {
    pub fn new(source: Arc<dyn SpriteSource>) -> Self {
        let (done_tx, done_rx) = mpsc::channel(64);
        Self {
            source,
            states: HashMap::new(),
            generation: 0,
            done_tx,
            done_rx,
        }
    }

    /// Starts (or restarts) the staggered load for one entity. A restart
    /// bumps the generation so stragglers from the previous round are
    /// ignored when they land.
    pub fn begin(&mut self, entity_id: u64, sprite_index: u32) {
        self.generation += 1;
        let generation = self.generation;
        self.states.insert(
            entity_id,
            SpriteLoad::Loading {
                generation,
                partial: PartialSet::default(),
            },
        );

        for direction in FetchDirection::ALL {
            for frame in 0..FRAME_SUFFIXES.len() {
                let source = self.source.clone();
                let done_tx = self.done_tx.clone();
                tokio::spawn(async move {
                    let result = source.load(sprite_index, direction, frame).await;
                    let _ = done_tx
                        .send(Completion {
                            entity_id,
                            generation,
                            direction,
                            frame,
                            result,
                        })
                        .await;
                });
            }
        }
    }

    pub fn forget(&mut self, entity_id: u64) {
        self.states.remove(&entity_id);
    }

    /// Whether a load has been started (in any state) for this entity.
    pub fn contains(&self, entity_id: u64) -> bool {
        self.states.contains_key(&entity_id)
    }

    pub fn retain(&mut self, keep: impl Fn(u64) -> bool) {
        self.states.retain(|id, _| keep(*id));
    }

    /// Folds finished fetches into their entity's load state.
    pub fn apply_completions(&mut self) {
        while let Ok(completion) = self.done_rx.try_recv() {
            self.apply(completion);
        }
    }

    fn apply(&mut self, completion: Completion) {
        // The entity may have been removed, or its load restarted, while
        // this fetch was in flight.
        let Some(state) = self.states.get_mut(&completion.entity_id) else {
            return;
        };
        let SpriteLoad::Loading { generation, partial } = state else {
            return;
        };
        if *generation != completion.generation {
            return;
        }

        match completion.result {
            Ok(image) => {
                partial.insert(completion.direction, completion.frame, image);
                if partial.loaded == TOTAL_FETCHES {
                    let finished = std::mem::take(partial);
                    *state = match finished.into_set() {
                        Some(set) => SpriteLoad::Ready(set),
                        None => SpriteLoad::Failed,
                    };
                }
            }
            Err(e) => {
                warn!(
                    entity_id = completion.entity_id,
                    error = %e,
                    "sprite frame load failed",
                );
                *state = SpriteLoad::Failed;
            }
        }
    }

    /// The finished set for an entity, if every frame has landed.
    pub fn get(&self, entity_id: u64) -> Option<&SpriteSet> {
        match self.states.get(&entity_id) {
            Some(SpriteLoad::Ready(set)) => Some(set),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    /// 2x1 image whose left pixel encodes the direction and frame, so
    /// mirroring is observable.
    fn stamp(direction: FetchDirection, frame: usize) -> RgbaImage {
        let tag = match direction {
            FetchDirection::Left => 10,
            FetchDirection::Up => 20,
            FetchDirection::Down => 30,
        } + frame as u8;
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([tag, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 0, 0, 255]));
        img
    }

    struct InstantSprites;

    #[async_trait]
    impl SpriteSource for InstantSprites {
        async fn load(
            &self,
            _sprite_index: u32,
            direction: FetchDirection,
            frame: usize,
        ) -> Result<RgbaImage, SpriteError> {
            Ok(stamp(direction, frame))
        }
    }

    struct MissingUpFrame;

    #[async_trait]
    impl SpriteSource for MissingUpFrame {
        async fn load(
            &self,
            _sprite_index: u32,
            direction: FetchDirection,
            frame: usize,
        ) -> Result<RgbaImage, SpriteError> {
            if direction == FetchDirection::Up && frame == 2 {
                Err(SpriteError::Io(std::io::Error::other("missing")))
            } else {
                Ok(stamp(direction, frame))
            }
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn set_becomes_ready_once_all_frames_land() {
        let mut bank = SpriteBank::new(Arc::new(InstantSprites));
        bank.begin(42, 1);
        assert!(bank.get(42).is_none());

        settle().await;
        bank.apply_completions();

        let set = bank.get(42).unwrap();
        assert_eq!(set.frame(Facing::Down, 1).get_pixel(0, 0).0[0], 31);
        assert_eq!(set.frame(Facing::Up, 0).get_pixel(0, 0).0[0], 20);
    }

    #[tokio::test]
    async fn right_row_is_the_mirrored_left_row() {
        let mut bank = SpriteBank::new(Arc::new(InstantSprites));
        bank.begin(42, 1);
        settle().await;
        bank.apply_completions();

        let set = bank.get(42).unwrap();
        for frame in 0..3 {
            let left = set.frame(Facing::Left, frame);
            let right = set.frame(Facing::Right, frame);
            assert_eq!(left.get_pixel(0, 0), right.get_pixel(1, 0));
            assert_eq!(left.get_pixel(1, 0), right.get_pixel(0, 0));
        }
    }

    #[tokio::test]
    async fn one_failed_frame_parks_the_entity_as_failed() {
        let mut bank = SpriteBank::new(Arc::new(MissingUpFrame));
        bank.begin(42, 1);
        settle().await;
        bank.apply_completions();

        assert!(bank.get(42).is_none());
        assert!(matches!(bank.states.get(&42), Some(SpriteLoad::Failed)));
    }

    #[tokio::test]
    async fn restart_ignores_stragglers_from_the_previous_round() {
        let mut bank = SpriteBank::new(Arc::new(InstantSprites));
        // The first round's tasks have not run yet when the restart lands.
        bank.begin(42, 1);
        bank.begin(42, 2);

        settle().await;
        bank.apply_completions();

        // Nine stale completions were dropped; nine current ones filled the
        // set exactly once.
        assert!(bank.get(42).is_some());
    }

    #[tokio::test]
    async fn completions_for_forgotten_entities_are_dropped() {
        let mut bank = SpriteBank::new(Arc::new(InstantSprites));
        bank.begin(42, 1);
        bank.forget(42);

        settle().await;
        bank.apply_completions();

        assert!(bank.get(42).is_none());
        assert!(bank.states.get(&42).is_none());
    }

    #[test]
    fn frame_lookup_clamps_out_of_range_indices() {
        let partial = {
            let mut p = PartialSet::default();
            for direction in FetchDirection::ALL {
                for frame in 0..3 {
                    p.insert(direction, frame, stamp(direction, frame));
                }
            }
            p
        };
        let set = partial.into_set().unwrap();

        assert_eq!(
            set.frame(Facing::Left, 9).get_pixel(0, 0),
            set.frame(Facing::Left, 2).get_pixel(0, 0),
        );
    }
}
