pub mod traits;
pub mod worker_host;

pub use traits::{TileWorker, WorkerResult};
pub use worker_host::WorkerHost;
