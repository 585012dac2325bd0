use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustfft::FftPlanner;
use spectra_core::{
    SourceVersion, TileFailure, TileRequest, TileWorker, WorkerRequest, WorkerResponse,
    WorkerResult,
};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::render::{render_tile, FftPlan, RenderError};

/// Samples frozen for one source version.
struct LoadedSource {
    version: SourceVersion,
    samples: Arc<[f32]>,
    sample_rate: u32,
    plan: FftPlan,
}

/// Tile worker computing STFT spectrograms with rustfft.
///
/// Tiles render on the blocking pool, at most `threads` at a time, so
/// responses come back in completion order rather than request order.
pub struct StftWorker {
    fft_size: usize,
    planner: Mutex<FftPlanner<f32>>,
    permits: Arc<Semaphore>,
    threads: usize,
    source: Option<LoadedSource>,
    tiles_rendered: Arc<AtomicU64>,
    tiles_failed: Arc<AtomicU64>,
}

impl StftWorker {
    pub fn new(fft_size: usize, threads: usize) -> Self {
        let threads = threads.max(1);
        Self {
            fft_size,
            planner: Mutex::new(FftPlanner::new()),
            permits: Arc::new(Semaphore::new(threads)),
            threads,
            source: None,
            tiles_rendered: Arc::new(AtomicU64::new(0)),
            tiles_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_settings(settings: &spectra_core::Settings) -> Self {
        Self::new(settings.fft_size, settings.worker_threads)
    }

    /// Plans are cached by the planner, so re-initializing is cheap.
    fn plan(&self) -> Result<FftPlan, RenderError> {
        let mut planner = self.planner.lock();
        FftPlan::new(&mut planner, self.fft_size)
    }

    fn init(&mut self, version: SourceVersion, samples: Vec<f32>, sample_rate: u32) -> WorkerResponse {
        if sample_rate == 0 {
            return WorkerResponse::InitFailed {
                version,
                reason: "sample rate is zero".to_string(),
                samples: Some(samples),
            };
        }
        if samples.is_empty() {
            return WorkerResponse::InitFailed {
                version,
                reason: "no samples".to_string(),
                samples: Some(samples),
            };
        }
        let plan = match self.plan() {
            Ok(plan) => plan,
            Err(e) => {
                return WorkerResponse::InitFailed {
                    version,
                    reason: e.to_string(),
                    samples: Some(samples),
                };
            }
        };

        log::info!(
            "STFT worker loaded {} ({} samples @ {} Hz, fft {})",
            version,
            samples.len(),
            sample_rate,
            self.fft_size
        );
        self.source = Some(LoadedSource {
            version,
            samples: samples.into(),
            sample_rate,
            plan,
        });
        WorkerResponse::InitComplete {
            version,
            tile: None,
        }
    }

    fn spawn_tile(
        &self,
        tasks: &mut JoinSet<()>,
        version: SourceVersion,
        spec: TileRequest,
        tx: mpsc::Sender<WorkerResponse>,
    ) {
        let key = spec.key;
        let source = match &self.source {
            Some(source) if source.version == version => source,
            _ => {
                let response = WorkerResponse::TileFailed {
                    version,
                    key,
                    failure: TileFailure::NotInitialized,
                };
                tasks.spawn(async move {
                    let _ = tx.send(response).await;
                });
                return;
            }
        };

        let samples = source.samples.clone();
        let sample_rate = source.sample_rate;
        let plan = source.plan.clone();
        let permits = self.permits.clone();
        let rendered = self.tiles_rendered.clone();
        let failed = self.tiles_failed.clone();

        tasks.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(permit) => {
                    let render = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        render_tile(&samples, sample_rate, &spec, &plan)
                    })
                    .await;
                    match render {
                        Ok(Ok(raster)) => Ok(raster),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(e) => Err(format!("render task failed: {}", e)),
                    }
                }
                Err(e) => Err(e.to_string()),
            };

            let response = match result {
                Ok(raster) => {
                    rendered.fetch_add(1, Ordering::Relaxed);
                    WorkerResponse::TileReady {
                        version,
                        key,
                        raster,
                    }
                }
                Err(reason) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Tile {} failed: {}", key, reason);
                    WorkerResponse::TileFailed {
                        version,
                        key,
                        failure: TileFailure::Compute(reason),
                    }
                }
            };
            if tx.send(response).await.is_err() {
                log::debug!("Response channel closed, dropping tile {}", key);
            }
        });
    }
}

#[async_trait]
impl TileWorker for StftWorker {
    fn name(&self) -> &str {
        "stft"
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<WorkerRequest>,
        tx: mpsc::Sender<WorkerResponse>,
    ) -> WorkerResult<()> {
        let mut tasks = JoinSet::new();

        while let Some(request) = rx.recv().await {
            while tasks.try_join_next().is_some() {}

            match request {
                WorkerRequest::Init {
                    version,
                    samples,
                    sample_rate,
                } => {
                    let response = self.init(version, samples, sample_rate);
                    tx.send(response).await?;
                }
                WorkerRequest::GetTile { version, spec } => {
                    log::debug!("Rendering tile {} for {}", spec.key, version);
                    self.spawn_tile(&mut tasks, version, spec, tx.clone());
                }
                WorkerRequest::Shutdown => {
                    log::info!("STFT worker received shutdown");
                    break;
                }
            }
        }

        tasks.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> WorkerResult<()> {
        self.source = None;
        self.permits.close();
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        let mut status = HashMap::new();
        status.insert("fft_size".to_string(), self.fft_size.to_string());
        status.insert("threads".to_string(), self.threads.to_string());
        status.insert(
            "tiles_rendered".to_string(),
            self.tiles_rendered.load(Ordering::Relaxed).to_string(),
        );
        status.insert(
            "tiles_failed".to_string(),
            self.tiles_failed.load(Ordering::Relaxed).to_string(),
        );
        status.insert(
            "source".to_string(),
            self.source
                .as_ref()
                .map(|s| s.version.to_string())
                .unwrap_or_else(|| "none".to_string()),
        );
        status
    }
}
