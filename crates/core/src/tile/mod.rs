pub mod geometry;
pub mod request_tracker;
pub mod tile_cache;

pub use geometry::{
    playhead_x_px, tile_width_px, total_tiles, total_width_px, visible_tile_range, GainKey,
    TileDescriptor, TileKey, ViewportGeometry, MAX_RENDER_WIDTH_PX, PREFETCH_MARGIN_TILES,
    RASTER_HEIGHT_PX, TILE_DURATION_SECONDS,
};
pub use request_tracker::RequestTracker;
pub use tile_cache::{Raster, RasterError, TileCache};
