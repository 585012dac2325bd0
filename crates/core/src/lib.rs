pub use audio::{DecodedAudio, MonoBuffer, SourceError, SourceSnapshot};
pub use compositor::{compose, DrawCommand, Frame, Overlay, OverlayContext, TimedLabels};
pub use config::{ConfigError, ConfigManager, ConfigSchema, Settings};
pub use messages::{SourceVersion, TileFailure, TileRequest, WorkerRequest, WorkerResponse};
pub use scheduler::{
    RenderList, RequestSink, SchedulerState, SendError, ViewportScheduler, WorkerHealth,
    MAX_ZOOM, MIN_ZOOM,
};
pub use tile::{
    GainKey, Raster, RasterError, RequestTracker, TileCache, TileDescriptor, TileKey,
    ViewportGeometry, MAX_RENDER_WIDTH_PX, PREFETCH_MARGIN_TILES, RASTER_HEIGHT_PX,
    TILE_DURATION_SECONDS,
};
pub use view::{view_channel, SpectrogramView, ViewCommand, ViewError, ViewEvent, ViewHandle};
pub use worker::{TileWorker, WorkerHost, WorkerResult};

pub mod audio;
pub mod compositor;
pub mod config;
pub mod messages;
pub mod scheduler;
pub mod tile;
pub mod view;
pub mod worker;
