use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::{WorkerRequest, WorkerResponse};

pub type WorkerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// The off-thread side of the computation channel.
///
/// A worker owns whatever it was initialized with and answers every request
/// it receives, in any order. It must stop when it sees
/// [`WorkerRequest::Shutdown`] or when `rx` closes.
#[async_trait]
pub trait TileWorker: Send {
    fn name(&self) -> &str;

    /// Main loop
    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<WorkerRequest>,
        tx: mpsc::Sender<WorkerResponse>,
    ) -> WorkerResult<()>;

    /// Release resources after `run` returns
    async fn shutdown(&mut self) -> WorkerResult<()>;

    fn status(&self) -> HashMap<String, String>;
}
