//! Tile walkability, backed by a plain-text bitmap asset.
//!
//! The asset has one line per map row and one character per column; `'1'`
//! marks passable ground. Anything else, a short row, or a coordinate
//! outside the configured grid is blocked.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::config;

#[derive(Debug, Error)]
pub enum CollisionError {
    #[error("failed to read collision map: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct CollisionMap {
    rows: Vec<Vec<u8>>,
}

impl CollisionMap {
    pub fn parse(text: &str) -> Self {
        Self {
            rows: text.split('\n').map(|line| line.as_bytes().to_vec()).collect(),
        }
    }

    /// A map with every in-bounds tile passable. Stands in for the shipped
    /// asset in headless runs and tests.
    pub fn all_passable() -> Self {
        Self {
            rows: vec![vec![b'1'; config::MAP_TILES_X as usize]; config::MAP_TILES_Y as usize],
        }
    }

    /// Streams the file from disk, reporting percent completion as bytes
    /// arrive. The callback is capped at 99 until the parse finishes, then
    /// called once with 100.
    pub fn load(path: &Path, mut on_progress: impl FnMut(u8)) -> Result<Self, CollisionError> {
        let file = std::fs::File::open(path)?;
        let total = file.metadata()?.len().max(1);
        let mut reader = std::io::BufReader::new(file);

        let mut bytes = Vec::new();
        let mut buf = [0u8; 64 * 1024];
        let mut loaded: u64 = 0;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            loaded += n as u64;
            bytes.extend_from_slice(&buf[..n]);
            on_progress((loaded * 100 / total).min(99) as u8);
        }

        let map = Self::parse(&String::from_utf8_lossy(&bytes));
        on_progress(100);
        Ok(map)
    }

    /// Checks both the configured grid bounds and the rows that actually
    /// parsed; a truncated file blocks the tiles it fails to cover.
    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        if x < 0 || x >= config::MAP_TILES_X || y < 0 || y >= config::MAP_TILES_Y {
            return false;
        }
        let Some(row) = self.rows.get(y as usize) else {
            return false;
        };
        matches!(row.get(x as usize), Some(b'1'))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn ones_are_passable_and_everything_else_is_not() {
        let map = CollisionMap::parse("110\n011");

        assert!(map.is_walkable(0, 0));
        assert!(map.is_walkable(1, 0));
        assert!(!map.is_walkable(2, 0));
        assert!(!map.is_walkable(0, 1));
        assert!(map.is_walkable(2, 1));
    }

    #[test]
    fn out_of_bounds_coordinates_are_blocked() {
        let map = CollisionMap::all_passable();

        assert!(map.is_walkable(0, 0));
        assert!(map.is_walkable(config::MAP_TILES_X - 1, config::MAP_TILES_Y - 1));
        assert!(!map.is_walkable(-1, 0));
        assert!(!map.is_walkable(0, -1));
        assert!(!map.is_walkable(config::MAP_TILES_X, 0));
        assert!(!map.is_walkable(0, config::MAP_TILES_Y));
    }

    #[test]
    fn short_rows_and_missing_rows_are_blocked() {
        let map = CollisionMap::parse("1\n11");

        assert!(map.is_walkable(0, 0));
        assert!(!map.is_walkable(1, 0));
        assert!(map.is_walkable(1, 1));
        assert!(!map.is_walkable(0, 2));
    }

    #[test]
    fn load_reports_capped_progress_then_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collision.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"101\n010").unwrap();
        drop(file);

        let mut reports = Vec::new();
        let map = CollisionMap::load(&path, |pct| reports.push(pct)).unwrap();

        assert!(map.is_walkable(0, 0));
        assert!(!map.is_walkable(1, 0));
        let (finished, streaming) = reports.split_last().unwrap();
        assert_eq!(*finished, 100);
        assert!(streaming.iter().all(|pct| *pct <= 99));
    }

    #[test]
    fn load_surfaces_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = CollisionMap::load(&dir.path().join("absent.txt"), |_| {});
        assert!(matches!(result, Err(CollisionError::Io(_))));
    }
}
