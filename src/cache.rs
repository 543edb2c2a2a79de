use crate::config::TileSize;
use crate::decoder::{FrameSequence, SourceDecoder};
use crate::tiling::{FitPolicy, TileSet, tile_image};
use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shortest frame delay the scheduler will honor. Sources declaring a zero
/// inter-frame delay get this instead.
pub const MIN_FRAME_DELAY: Duration = Duration::from_millis(160);

/// One prepared animation frame: a tile per panel plus how long the frame
/// stays up.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub tiles: TileSet,
    pub delay: Duration,
}

/// Prepared frame sets for animated sources, keyed by file path. An entry
/// is built once and kept for the life of the process; `clear` is the only
/// way to drop entries.
pub struct AnimationCache {
    entries: Mutex<HashMap<String, Arc<Vec<PreparedFrame>>>>,
}

impl AnimationCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the prepared frames for `path`, decoding and tiling them on
    /// first use. The lock is held across preparation so two callers can
    /// never decode the same source twice.
    pub fn prepare<D: SourceDecoder + ?Sized>(
        &self,
        path: &Path,
        decoder: &D,
        tile_size: TileSize,
        cols: usize,
        rows: usize,
    ) -> Result<Arc<Vec<PreparedFrame>>> {
        let key = path.to_string_lossy().into_owned();
        let mut entries = self.entries.lock().unwrap();
        if let Some(frames) = entries.get(&key) {
            debug!("Using cached animation for {path:?}");
            return Ok(frames.clone());
        }

        let sequence = decoder
            .decode(path)
            .with_context(|| format!("Failed to prepare animation {path:?}"))?;
        let frames = Arc::new(build_frames(sequence, tile_size, cols, rows));
        entries.insert(key, frames.clone());
        debug!("Prepared {} frames for {path:?}", frames.len());
        Ok(frames)
    }

    /// Tile and store an already-decoded sequence. Returns the existing
    /// entry when `path` was prepared before.
    pub fn insert_sequence(
        &self,
        path: &Path,
        sequence: FrameSequence,
        tile_size: TileSize,
        cols: usize,
        rows: usize,
    ) -> Arc<Vec<PreparedFrame>> {
        let key = path.to_string_lossy().into_owned();
        let mut entries = self.entries.lock().unwrap();
        if let Some(frames) = entries.get(&key) {
            return frames.clone();
        }
        let frames = Arc::new(build_frames(sequence, tile_size, cols, rows));
        entries.insert(key, frames.clone());
        frames
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .unwrap()
            .contains_key(path.to_string_lossy().as_ref())
    }

    /// Drop every prepared entry. Later playback re-decodes on demand.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        let count = entries.len();
        entries.clear();
        if count > 0 {
            debug!("Cleared {count} prepared animations");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for AnimationCache {
    fn default() -> Self {
        Self::new()
    }
}

fn build_frames(
    sequence: FrameSequence,
    tile_size: TileSize,
    cols: usize,
    rows: usize,
) -> Vec<PreparedFrame> {
    let mut frames = Vec::with_capacity(sequence.frame_count());
    for frame in sequence.into_frames() {
        let delay = if frame.delay.is_zero() {
            MIN_FRAME_DELAY
        } else {
            frame.delay
        };
        let tiles = tile_image(&frame.image, tile_size, cols, rows, FitPolicy::Scale);
        frames.push(PreparedFrame { tiles, delay });
    }
    frames
}
