mod sink;
mod viewport_scheduler;

pub use sink::{RequestSink, SendError};
pub use viewport_scheduler::{
    init_backoff, RenderList, SchedulerState, ViewportScheduler, WorkerHealth, MAX_ZOOM, MIN_ZOOM,
};
