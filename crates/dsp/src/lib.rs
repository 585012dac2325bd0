pub mod colormap;
pub mod decode;
pub mod render;
pub mod stft_worker;

pub use colormap::intensity_to_rgba;
pub use decode::{decode_file, DecodedBuffer};
pub use render::{render_tile, FftPlan, RenderError, DB_CEILING, DB_FLOOR};
pub use stft_worker::StftWorker;
