//! Tile identity and pixel geometry.
//!
//! Everything here is a pure function of the viewport and zoom. Tile identity
//! (index + gain) never depends on zoom; only the on-screen placement does.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use super::tile_cache::Raster;

/// Duration covered by a single tile.
pub const TILE_DURATION_SECONDS: f64 = 5.0;

/// Height of every raster requested from the worker.
pub const RASTER_HEIGHT_PX: u32 = 256;

/// Hard cap on the raster width requested from the worker. Display width can
/// exceed this at high zoom; the raster is stretched instead.
pub const MAX_RENDER_WIDTH_PX: u32 = 8192;

/// Extra tiles scheduled on each side of the visible range.
pub const PREFETCH_MARGIN_TILES: usize = 1;

/// Gain quantized to thousandths so it can take part in hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GainKey(i32);

impl GainKey {
    pub fn from_gain(gain: f32) -> Self {
        Self((gain as f64 * 1000.0).round() as i32)
    }

    pub fn value(self) -> f32 {
        self.0 as f32 / 1000.0
    }
}

impl fmt::Display for GainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.value())
    }
}

/// Identity of one tile: its ordinal position in the track and the gain it was
/// rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub index: usize,
    pub gain: GainKey,
}

impl TileKey {
    pub fn new(index: usize, gain: f32) -> Self {
        Self {
            index,
            gain: GainKey::from_gain(gain),
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.gain)
    }
}

/// Scroll position and size of the visible window, in content pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportGeometry {
    pub scroll_offset_px: f64,
    pub viewport_width_px: f64,
    pub zoom_px_per_second: f64,
    pub tile_duration_seconds: f64,
}

impl ViewportGeometry {
    pub fn tile_width_px(&self) -> f64 {
        tile_width_px(self.tile_duration_seconds, self.zoom_px_per_second)
    }
}

/// Number of tiles needed to cover `total_duration_seconds`.
pub fn total_tiles(total_duration_seconds: f64, tile_duration_seconds: f64) -> usize {
    if !(total_duration_seconds > 0.0) || !(tile_duration_seconds > 0.0) {
        return 0;
    }
    (total_duration_seconds / tile_duration_seconds).ceil() as usize
}

pub fn tile_width_px(tile_duration_seconds: f64, zoom_px_per_second: f64) -> f64 {
    tile_duration_seconds * zoom_px_per_second
}

/// Full scrollable width of the timeline.
pub fn total_width_px(total_duration_seconds: f64, zoom_px_per_second: f64) -> f64 {
    total_duration_seconds * zoom_px_per_second
}

/// Screen position of the playhead. External overlays rely on this staying linear.
pub fn playhead_x_px(current_time_seconds: f64, zoom_px_per_second: f64) -> f64 {
    current_time_seconds * zoom_px_per_second
}

/// Tile indices that must be on screen, widened by `margin` tiles on each side
/// and clamped to the track.
///
/// `first = floor(scroll / tile_width)` and `last = ceil((scroll + width) /
/// tile_width)`; the result is `[first - margin, last + margin]` intersected
/// with `[0, total_tiles)`.
pub fn visible_tile_range(
    viewport: &ViewportGeometry,
    total_duration_seconds: f64,
    margin: usize,
) -> Range<usize> {
    let total = total_tiles(total_duration_seconds, viewport.tile_duration_seconds);
    let tile_width = viewport.tile_width_px();
    if total == 0 || !(tile_width > 0.0) || !tile_width.is_finite() {
        return 0..0;
    }

    let scroll = viewport.scroll_offset_px.max(0.0);
    let width = viewport.viewport_width_px.max(0.0);

    let first = (scroll / tile_width).floor() as usize;
    let last = ((scroll + width) / tile_width).ceil() as usize;

    let start = first.saturating_sub(margin).min(total);
    let end = last.saturating_add(margin).saturating_add(1).min(total);
    if start >= end {
        return 0..0;
    }
    start..end
}

/// One tile as the scheduler sees it during a single recompute.
#[derive(Debug, Clone)]
pub struct TileDescriptor {
    pub key: TileKey,
    pub start_time_seconds: f64,
    pub end_time_seconds: f64,
    pub left_px: f64,
    pub width_px: f64,
    /// Width actually requested from the worker.
    pub render_width_px: u32,
    pub raster: Option<Arc<Raster>>,
}

impl TileDescriptor {
    pub fn new(
        index: usize,
        gain: f32,
        tile_duration_seconds: f64,
        zoom_px_per_second: f64,
        max_render_width_px: u32,
    ) -> Self {
        let width_px = tile_width_px(tile_duration_seconds, zoom_px_per_second);
        let render_width_px = (width_px.ceil().max(1.0) as u64)
            .min(max_render_width_px.max(1) as u64) as u32;
        Self {
            key: TileKey::new(index, gain),
            start_time_seconds: index as f64 * tile_duration_seconds,
            end_time_seconds: (index + 1) as f64 * tile_duration_seconds,
            left_px: index as f64 * width_px,
            width_px,
            render_width_px,
            raster: None,
        }
    }

    pub fn is_rendered(&self) -> bool {
        self.raster.is_some()
    }

    /// End of the audible part of this tile; the last tile of a track is
    /// usually partial.
    pub fn audible_end_seconds(&self, total_duration_seconds: f64) -> f64 {
        self.end_time_seconds.min(total_duration_seconds)
    }
}

impl PartialEq for TileDescriptor {
    fn eq(&self, other: &Self) -> bool {
        let same_raster = match (&self.raster, &other.raster) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.key == other.key
            && self.start_time_seconds == other.start_time_seconds
            && self.end_time_seconds == other.end_time_seconds
            && self.left_px == other.left_px
            && self.width_px == other.width_px
            && self.render_width_px == other.render_width_px
            && same_raster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(scroll: f64, width: f64, zoom: f64) -> ViewportGeometry {
        ViewportGeometry {
            scroll_offset_px: scroll,
            viewport_width_px: width,
            zoom_px_per_second: zoom,
            tile_duration_seconds: TILE_DURATION_SECONDS,
        }
    }

    #[test]
    fn test_total_tiles_rounds_up() {
        assert_eq!(total_tiles(12.0, 5.0), 3);
        assert_eq!(total_tiles(10.0, 5.0), 2);
        assert_eq!(total_tiles(0.1, 5.0), 1);
        assert_eq!(total_tiles(0.0, 5.0), 0);
        assert_eq!(total_tiles(-3.0, 5.0), 0);
        assert_eq!(total_tiles(f64::NAN, 5.0), 0);
    }

    #[test]
    fn test_partial_last_tile() {
        // 12 s track: tile 2 covers 10-12 s of audio but keeps full pixel width
        let tile = TileDescriptor::new(2, 9.0, 5.0, 500.0, MAX_RENDER_WIDTH_PX);
        assert_eq!(tile.start_time_seconds, 10.0);
        assert_eq!(tile.end_time_seconds, 15.0);
        assert_eq!(tile.audible_end_seconds(12.0), 12.0);
        assert_eq!(tile.width_px, 2500.0);
        assert_eq!(visible_tile_range(&viewport(0.0, 100_000.0, 500.0), 12.0, 1), 0..3);
    }

    #[test]
    fn test_visible_range_with_margin() {
        // Pixels [1000, 1500) at 500 px/s, 2500 px tiles: first 0, last 1, margin -> 0..=2
        let range = visible_tile_range(&viewport(1000.0, 500.0, 500.0), 60.0, 1);
        assert_eq!(range, 0..3);

        let range = visible_tile_range(&viewport(10_000.0, 500.0, 500.0), 60.0, 1);
        // first = 4, last = ceil(10500 / 2500) = 5
        assert_eq!(range, 3..7);
    }

    #[test]
    fn test_visible_range_clamped_to_track() {
        let range = visible_tile_range(&viewport(9000.0, 5000.0, 500.0), 12.0, 1);
        assert_eq!(range, 2..3);

        // Scrolled past the end entirely
        let range = visible_tile_range(&viewport(50_000.0, 500.0, 500.0), 12.0, 1);
        assert!(range.is_empty());
    }

    #[test]
    fn test_visible_range_degenerate_inputs() {
        assert!(visible_tile_range(&viewport(0.0, 500.0, 0.0), 60.0, 1).is_empty());
        assert!(visible_tile_range(&viewport(0.0, 500.0, 500.0), 0.0, 1).is_empty());
        // Negative scroll behaves like zero
        assert_eq!(visible_tile_range(&viewport(-200.0, 500.0, 500.0), 60.0, 1), 0..3);
    }

    #[test]
    fn test_tiles_are_contiguous() {
        for zoom in [0.5, 13.0, 500.0, 2048.0, 9999.5] {
            for i in 0..20 {
                let a = TileDescriptor::new(i, 9.0, 5.0, zoom, MAX_RENDER_WIDTH_PX);
                let b = TileDescriptor::new(i + 1, 9.0, 5.0, zoom, MAX_RENDER_WIDTH_PX);
                assert!((a.left_px - i as f64 * 5.0 * zoom).abs() < 1e-6);
                assert!((b.left_px - (a.left_px + a.width_px)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_render_width_is_capped() {
        let tile = TileDescriptor::new(0, 9.0, 5.0, 4000.0, MAX_RENDER_WIDTH_PX);
        assert_eq!(tile.width_px, 20_000.0);
        assert_eq!(tile.render_width_px, MAX_RENDER_WIDTH_PX);

        let tile = TileDescriptor::new(0, 9.0, 5.0, 0.01, MAX_RENDER_WIDTH_PX);
        assert_eq!(tile.render_width_px, 1);
    }

    #[test]
    fn test_key_includes_gain() {
        assert_ne!(TileKey::new(0, 9.0), TileKey::new(0, 12.0));
        assert_eq!(TileKey::new(0, 9.0), TileKey::new(0, 9.0000001));
        assert_eq!(TileKey::new(3, 9.0).to_string(), "3@9.000");
    }

    #[test]
    fn test_playhead_and_total_width_are_linear() {
        assert_eq!(playhead_x_px(2.5, 500.0), 1250.0);
        assert_eq!(total_width_px(12.0, 500.0), 6000.0);
    }
}
