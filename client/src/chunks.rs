//! Viewport-driven streaming of the oversized background image.
//!
//! The map ships pre-cut into square chunk images. The manager keeps exactly
//! the window of chunks around the camera resident, streams missing ones in
//! the background, and evicts the moment a chunk leaves the window, so
//! memory stays bounded no matter how large the map is.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config;

/// Chunk-grid coordinate, floor-divided from pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub cx: i32,
    pub cy: i32,
}

impl ChunkKey {
    /// Key of the chunk containing the given pixel position.
    pub fn from_pixels(x: f32, y: f32) -> Self {
        Self {
            cx: (x / config::CHUNK_SIZE as f32).floor() as i32,
            cy: (y / config::CHUNK_SIZE as f32).floor() as i32,
        }
    }

    /// Pixel position of this chunk's top-left corner.
    pub fn pixel_origin(self) -> (i32, i32) {
        (
            self.cx * config::CHUNK_SIZE as i32,
            self.cy * config::CHUNK_SIZE as i32,
        )
    }
}

/// The clamped odd-edged chunk window centered on a camera position, in
/// row-major order.
pub fn visible_window(camera_x: f32, camera_y: f32) -> Vec<ChunkKey> {
    let center = ChunkKey::from_pixels(camera_x, camera_y);
    let half = config::VISIBLE_CHUNKS / 2;
    let max_cx = (config::MAP_WIDTH / config::CHUNK_SIZE) as i32 - 1;
    let max_cy = (config::MAP_HEIGHT / config::CHUNK_SIZE) as i32 - 1;

    let min_x = (center.cx - half).clamp(0, max_cx);
    let max_x = (center.cx + half).clamp(0, max_cx);
    let min_y = (center.cy - half).clamp(0, max_cy);
    let max_y = (center.cy + half).clamp(0, max_cy);

    let mut keys = Vec::with_capacity(((max_x - min_x + 1) * (max_y - min_y + 1)) as usize);
    for cy in min_y..=max_y {
        for cx in min_x..=max_x {
            keys.push(ChunkKey { cx, cy });
        }
    }
    keys
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("failed to read chunk image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode chunk image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Asynchronous supplier of chunk images.
#[async_trait]
pub trait ChunkSource: Send + Sync + 'static {
    async fn load(&self, key: ChunkKey) -> Result<RgbaImage, ChunkError>;
}

/// Reads pre-cut `map_{x}_{y}.png` images, named by pixel origin, from an
/// asset directory.
pub struct DirChunkSource {
    root: PathBuf,
}

impl DirChunkSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn chunk_path(&self, key: ChunkKey) -> PathBuf {
        let (px, py) = key.pixel_origin();
        self.root.join("tiles").join(format!("map_{px}_{py}.png"))
    }
}

#[async_trait]
impl ChunkSource for DirChunkSource {
    async fn load(&self, key: ChunkKey) -> Result<RgbaImage, ChunkError> {
        let bytes = tokio::fs::read(self.chunk_path(key)).await?;
        let img = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)?;
        Ok(img.into_rgba8())
    }
}

type Completion = (ChunkKey, Result<RgbaImage, ChunkError>);

/// Streams and caches the chunk window around the camera.
///
/// Loads run on spawned tasks, but completions are applied only inside
/// [`ChunkManager::update`], so the resident map is mutated from one logical
/// thread and needs no lock.
pub struct ChunkManager {
    source: Arc<dyn ChunkSource>,
    resident: HashMap<ChunkKey, RgbaImage>,
    in_flight: HashSet<ChunkKey>,
    done_tx: mpsc::Sender<Completion>,
    done_rx: mpsc::Receiver<Completion>,
    progress: u8,
}

impl ChunkManager {
    pub fn new(source: Arc<dyn ChunkSource>) -> Self {
        // The window caps concurrent loads, so completions never back up
        // against this capacity.
        let (done_tx, done_rx) = mpsc::channel(64);
        Self {
            source,
            resident: HashMap::new(),
            in_flight: HashSet::new(),
            done_tx,
            done_rx,
            progress: 0,
        }
    }

    /// One streaming pass for the given camera center, in world pixels:
    /// apply finished loads, request everything missing from the window,
    /// evict everything outside it.
    pub fn update(&mut self, camera_x: f32, camera_y: f32) {
        self.apply_completions();

        let window = visible_window(camera_x, camera_y);
        for key in &window {
            if !self.resident.contains_key(key) && !self.in_flight.contains(key) {
                self.request(*key);
            }
        }

        let keep: HashSet<ChunkKey> = window.iter().copied().collect();
        self.resident.retain(|key, _| keep.contains(key));

        let loaded = window.iter().filter(|k| self.resident.contains_key(k)).count();
        self.progress = (loaded * 100 / window.len()) as u8;
    }

    fn apply_completions(&mut self) {
        while let Ok((key, result)) = self.done_rx.try_recv() {
            self.in_flight.remove(&key);
            match result {
                // The camera may have moved on while this load ran; the
                // eviction pass right after discards it again.
                Ok(image) => {
                    self.resident.insert(key, image);
                }
                Err(e) => {
                    warn!(cx = key.cx, cy = key.cy, error = %e, "chunk load failed");
                }
            }
        }
    }

    fn request(&mut self, key: ChunkKey) {
        self.in_flight.insert(key);
        let source = self.source.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = source.load(key).await;
            // A discarded manager just drops the receiver; nothing reads
            // this completion afterwards.
            let _ = done_tx.send((key, result)).await;
        });
    }

    /// Percentage of the current window resident in memory. Not monotonic:
    /// moving the camera refills the window with missing chunks.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn get(&self, key: ChunkKey) -> Option<&RgbaImage> {
        self.resident.get(&key)
    }

    pub fn resident_keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.resident.keys().copied()
    }
}
