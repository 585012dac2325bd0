use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::traits::TileWorker;
use crate::messages::{WorkerRequest, WorkerResponse};

/// Runs a [`TileWorker`] on its own task and owns both ends of its channels.
pub struct WorkerHost {
    name: String,
    sender: mpsc::Sender<WorkerRequest>,
    handle: Option<JoinHandle<()>>,
    last_status: Arc<Mutex<HashMap<String, String>>>,
}

impl WorkerHost {
    /// Spawn `worker` with request and response channels of `capacity`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<W>(mut worker: W, capacity: usize) -> (Self, mpsc::Receiver<WorkerResponse>)
    where
        W: TileWorker + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
        let (response_tx, response_rx) = mpsc::channel(capacity.max(1));
        let name = worker.name().to_string();
        let last_status = Arc::new(Mutex::new(worker.status()));

        let task_name = name.clone();
        let task_status = last_status.clone();
        let handle = tokio::spawn(async move {
            log::info!("Worker {} started", task_name);
            if let Err(e) = worker.run(request_rx, response_tx).await {
                log::error!("Worker {} error: {}", task_name, e);
            }
            if let Err(e) = worker.shutdown().await {
                log::error!("Worker {} shutdown error: {}", task_name, e);
            }
            *task_status.lock() = worker.status();
            log::info!("Worker {} stopped", task_name);
        });

        let host = Self {
            name,
            sender: request_tx,
            handle: Some(handle),
            last_status,
        };
        (host, response_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sender for the scheduler. Cloning is cheap.
    pub fn sender(&self) -> mpsc::Sender<WorkerRequest> {
        self.sender.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Status reported at spawn time, replaced by the final status on exit.
    pub fn status(&self) -> HashMap<String, String> {
        self.last_status.lock().clone()
    }

    /// Ask the worker to stop and wait for its task to finish.
    pub async fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        log::info!("Shutting down worker {}...", self.name);
        if self.sender.send(WorkerRequest::Shutdown).await.is_err() {
            log::debug!("Worker {} already gone", self.name);
        }
        if let Err(e) = handle.await {
            log::error!("Worker {} task error: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::messages::{SourceVersion, TileFailure};
    use crate::worker::WorkerResult;

    struct EchoWorker {
        handled: usize,
    }

    #[async_trait]
    impl TileWorker for EchoWorker {
        fn name(&self) -> &str {
            "echo"
        }

        async fn run(
            &mut self,
            mut rx: mpsc::Receiver<WorkerRequest>,
            tx: mpsc::Sender<WorkerResponse>,
        ) -> WorkerResult<()> {
            while let Some(request) = rx.recv().await {
                match request {
                    WorkerRequest::Shutdown => break,
                    WorkerRequest::GetTile { version, spec } => {
                        self.handled += 1;
                        tx.send(WorkerResponse::TileFailed {
                            version,
                            key: spec.key,
                            failure: TileFailure::NotInitialized,
                        })
                        .await?;
                    }
                    WorkerRequest::Init { .. } => {}
                }
            }
            Ok(())
        }

        async fn shutdown(&mut self) -> WorkerResult<()> {
            Ok(())
        }

        fn status(&self) -> HashMap<String, String> {
            HashMap::from([("handled".to_string(), self.handled.to_string())])
        }
    }

    #[tokio::test]
    async fn test_spawn_round_trip_and_shutdown() {
        let (mut host, mut responses) = WorkerHost::spawn(EchoWorker { handled: 0 }, 4);
        assert_eq!(host.name(), "echo");

        let key = crate::tile::TileKey::new(2, 9.0);
        host.sender()
            .send(WorkerRequest::GetTile {
                version: SourceVersion(1),
                spec: crate::messages::TileRequest {
                    key,
                    start_time_seconds: 10.0,
                    end_time_seconds: 15.0,
                    gain: 9.0,
                    render_width_px: 100,
                    raster_height_px: 256,
                },
            })
            .await
            .unwrap();

        match responses.recv().await {
            Some(WorkerResponse::TileFailed { key: k, .. }) => assert_eq!(k, key),
            other => panic!("unexpected response {:?}", other),
        }

        host.shutdown().await;
        assert!(!host.is_running());
        assert_eq!(host.status().get("handled").map(String::as_str), Some("1"));
        // Idempotent
        host.shutdown().await;
    }
}
