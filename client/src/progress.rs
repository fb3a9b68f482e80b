//! Startup progress reporting.
//!
//! The engine owns a [`LoadProgress`] publisher; loading screens hold the
//! watch receiver returned by [`LoadProgress::new`]. The handle is passed
//! into whatever needs it rather than living in a process-wide global.

use tokio::sync::watch;

/// Snapshot observers receive over the watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    /// Collision bitmap download percentage.
    pub collision: u8,
    /// Share of the current chunk window resident in memory.
    pub chunks: u8,
    /// Set once the first frame has been produced.
    pub first_frame_rendered: bool,
}

impl ProgressSnapshot {
    /// Combined percentage for a loading bar.
    pub fn total(&self) -> u8 {
        ((u16::from(self.collision) + u16::from(self.chunks)) / 2) as u8
    }

    /// True once both resources are complete and a frame has rendered.
    pub fn loaded(&self) -> bool {
        self.collision == 100 && self.chunks == 100 && self.first_frame_rendered
    }
}

#[derive(Debug)]
pub struct LoadProgress {
    snapshot: ProgressSnapshot,
    tx: watch::Sender<ProgressSnapshot>,
}

impl LoadProgress {
    pub fn new() -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        (
            Self {
                snapshot: ProgressSnapshot::default(),
                tx,
            },
            rx,
        )
    }

    pub fn set_collision(&mut self, percent: u8) {
        if self.snapshot.collision != percent {
            self.snapshot.collision = percent;
            self.publish();
        }
    }

    pub fn set_chunks(&mut self, percent: u8) {
        if self.snapshot.chunks != percent {
            self.snapshot.chunks = percent;
            self.publish();
        }
    }

    pub fn mark_first_frame(&mut self) {
        if !self.snapshot.first_frame_rendered {
            self.snapshot.first_frame_rendered = true;
            self.publish();
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
    }

    fn publish(&self) {
        // Observers may all be gone; publishing is best effort.
        let _ = self.tx.send(self.snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_averages_both_resources() {
        let snapshot = ProgressSnapshot {
            collision: 100,
            chunks: 40,
            first_frame_rendered: false,
        };
        assert_eq!(snapshot.total(), 70);
        assert!(!snapshot.loaded());
    }

    #[test]
    fn loaded_requires_both_resources_and_a_frame() {
        let (mut progress, rx) = LoadProgress::new();
        progress.set_collision(100);
        progress.set_chunks(100);
        assert!(!rx.borrow().loaded());

        progress.mark_first_frame();
        assert!(rx.borrow().loaded());
        assert_eq!(rx.borrow().total(), 100);
    }

    #[test]
    fn publishing_survives_dropped_observers() {
        let (mut progress, rx) = LoadProgress::new();
        drop(rx);
        progress.set_collision(50);
        assert_eq!(progress.snapshot().collision, 50);
    }
}
