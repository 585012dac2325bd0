//! Completed tile rasters, keyed by tile identity.
//!
//! The cache lives exactly as long as one audio source. It has no eviction by
//! default. When a capacity is configured, tiles rendered at a gain other than
//! the current one go first, then tiles farthest from the visible range. Tiles
//! actually on screen are never dropped.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use thiserror::Error;

use super::geometry::{GainKey, TileKey};

/// Bytes per pixel in a [`Raster`] (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RasterError {
    #[error("Raster dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },

    #[error("Raster of {width}x{height} needs {expected} bytes, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Opaque RGBA bitmap produced by the worker for one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Raster {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(RasterError::SizeMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A raster filled with a single color. Width and height are clamped to 1.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * BYTES_PER_PIXEL)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = &self.pixels[offset..offset + BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

pub struct TileCache {
    tiles: HashMap<TileKey, Arc<Raster>>,
    capacity: Option<usize>,
    focus: Range<usize>,
    focus_gain: Option<GainKey>,
    total_bytes: usize,
}

impl TileCache {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            tiles: HashMap::new(),
            capacity: capacity.map(|c| c.max(1)),
            focus: 0..0,
            focus_gain: None,
            total_bytes: 0,
        }
    }

    pub fn get(&self, key: &TileKey) -> Option<Arc<Raster>> {
        self.tiles.get(key).cloned()
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key)
    }

    /// Store a raster, replacing any earlier one for the same key.
    ///
    /// Returns the replaced raster, if any.
    pub fn put(&mut self, key: TileKey, raster: Arc<Raster>) -> Option<Arc<Raster>> {
        self.total_bytes += raster.byte_len();
        let previous = self.tiles.insert(key, raster);
        if let Some(old) = &previous {
            self.total_bytes = self.total_bytes.saturating_sub(old.byte_len());
        }
        self.evict_over_capacity(&key);
        previous
    }

    pub fn remove(&mut self, key: &TileKey) -> Option<Arc<Raster>> {
        let removed = self.tiles.remove(key);
        if let Some(old) = &removed {
            self.total_bytes = self.total_bytes.saturating_sub(old.byte_len());
        }
        removed
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.total_bytes = 0;
    }

    /// Tile indices and gain currently on screen. Only used for eviction.
    pub fn set_focus(&mut self, visible: Range<usize>, gain: GainKey) {
        self.focus = visible;
        self.focus_gain = Some(gain);
    }

    fn is_off_gain(&self, key: &TileKey) -> bool {
        self.focus_gain.is_some_and(|gain| gain != key.gain)
    }

    fn distance_from_focus(&self, index: usize) -> usize {
        if index < self.focus.start {
            self.focus.start - index
        } else if index >= self.focus.end {
            index + 1 - self.focus.end
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.tiles.keys()
    }

    fn evict_over_capacity(&mut self, keep: &TileKey) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.tiles.len() > capacity {
            let farthest = self
                .tiles
                .keys()
                .filter(|k| *k != keep)
                .map(|k| (self.is_off_gain(k), self.distance_from_focus(k.index), *k))
                .filter(|(off_gain, distance, _)| *off_gain || *distance > 0)
                .max();
            match farthest {
                Some((off_gain, distance, key)) => {
                    log::debug!(
                        "Evicting tile {} ({} tiles off screen{})",
                        key,
                        distance,
                        if off_gain { ", stale gain" } else { "" }
                    );
                    self.remove(&key);
                }
                // Everything left is visible
                None => break,
            }
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}
