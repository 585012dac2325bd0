//! Async driver tying a [`ViewportScheduler`] to a running worker.
//!
//! The view owns the scheduler, so all scheduler state lives on one task.
//! Hosts talk to it through a [`ViewHandle`] and receive [`ViewEvent`]s.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::DecodedAudio;
use crate::compositor::{compose, Frame, Overlay};
use crate::config::Settings;
use crate::messages::{SourceVersion, WorkerRequest, WorkerResponse};
use crate::scheduler::{ViewportScheduler, WorkerHealth};
use crate::worker::WorkerHost;

pub enum ViewCommand {
    LoadSource(Arc<dyn DecodedAudio + Send + Sync>),
    Scroll(f64),
    Resize(f64),
    Zoom(f64),
    Gain(f32),
    Playhead(f64),
    Shutdown,
}

impl std::fmt::Debug for ViewCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewCommand::LoadSource(source) => write!(
                f,
                "LoadSource({:.2}s @ {} Hz)",
                source.duration_seconds(),
                source.sample_rate()
            ),
            ViewCommand::Scroll(px) => write!(f, "Scroll({})", px),
            ViewCommand::Resize(px) => write!(f, "Resize({})", px),
            ViewCommand::Zoom(zoom) => write!(f, "Zoom({})", zoom),
            ViewCommand::Gain(gain) => write!(f, "Gain({})", gain),
            ViewCommand::Playhead(t) => write!(f, "Playhead({})", t),
            ViewCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ViewEvent {
    Frame(Frame),
    SourceLoaded {
        version: SourceVersion,
        duration_seconds: f64,
    },
    SourceRejected {
        reason: String,
    },
    Degraded {
        reason: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("spectrogram view has shut down")]
    Closed,
}

/// Cloneable command sender for a running [`SpectrogramView`].
#[derive(Debug, Clone)]
pub struct ViewHandle {
    tx: mpsc::UnboundedSender<ViewCommand>,
}

impl ViewHandle {
    pub fn send(&self, command: ViewCommand) -> Result<(), ViewError> {
        self.tx.send(command).map_err(|_| ViewError::Closed)
    }

    pub fn load_source(&self, source: Arc<dyn DecodedAudio + Send + Sync>) -> Result<(), ViewError> {
        self.send(ViewCommand::LoadSource(source))
    }

    pub fn scroll(&self, scroll_offset_px: f64) -> Result<(), ViewError> {
        self.send(ViewCommand::Scroll(scroll_offset_px))
    }

    pub fn resize(&self, viewport_width_px: f64) -> Result<(), ViewError> {
        self.send(ViewCommand::Resize(viewport_width_px))
    }

    pub fn zoom(&self, zoom_px_per_second: f64) -> Result<(), ViewError> {
        self.send(ViewCommand::Zoom(zoom_px_per_second))
    }

    pub fn gain(&self, gain: f32) -> Result<(), ViewError> {
        self.send(ViewCommand::Gain(gain))
    }

    pub fn playhead(&self, seconds: f64) -> Result<(), ViewError> {
        self.send(ViewCommand::Playhead(seconds))
    }

    pub fn shutdown(&self) -> Result<(), ViewError> {
        self.send(ViewCommand::Shutdown)
    }
}

/// Create the command channel for a view.
pub fn view_channel() -> (ViewHandle, mpsc::UnboundedReceiver<ViewCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ViewHandle { tx }, rx)
}

pub struct SpectrogramView {
    scheduler: ViewportScheduler<mpsc::Sender<WorkerRequest>>,
    host: WorkerHost,
    responses: mpsc::Receiver<WorkerResponse>,
    events: mpsc::UnboundedSender<ViewEvent>,
    overlay: Option<Box<dyn Overlay>>,
    /// Held so a repeated `LoadSource` of the same buffer can be recognized.
    source: Option<Arc<dyn DecodedAudio + Send + Sync>>,
    playhead_seconds: f64,
    reported_degraded: bool,
}

impl SpectrogramView {
    pub fn new(
        settings: Settings,
        host: WorkerHost,
        responses: mpsc::Receiver<WorkerResponse>,
        events: mpsc::UnboundedSender<ViewEvent>,
    ) -> Self {
        let scheduler = ViewportScheduler::new(settings, host.sender());
        Self {
            scheduler,
            host,
            responses,
            events,
            overlay: None,
            source: None,
            playhead_seconds: 0.0,
            reported_degraded: false,
        }
    }

    pub fn with_overlay(mut self, overlay: Box<dyn Overlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn scheduler(&self) -> &ViewportScheduler<mpsc::Sender<WorkerRequest>> {
        &self.scheduler
    }

    /// Run until `Shutdown` arrives or every [`ViewHandle`] is dropped, then
    /// stop the worker.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ViewCommand>) {
        log::info!("Spectrogram view starting with worker {}", self.host.name());

        loop {
            let deadline = self.scheduler.next_deadline();

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(ViewCommand::Shutdown) => {
                            log::info!("Spectrogram view received shutdown");
                            break;
                        }
                        Some(command) => {
                            log::debug!("View command: {:?}", command);
                            self.handle_command(command);
                        }
                        None => {
                            log::info!("All view handles dropped");
                            break;
                        }
                    }
                    self.publish_frame();
                }

                Some(response) = self.responses.recv() => {
                    self.scheduler.handle_response(response);
                    self.publish_frame();
                }

                _ = async {
                    match deadline {
                        Some(deadline) => {
                            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                        }
                        None => std::future::pending().await,
                    }
                } => {
                    if self.scheduler.poll_timers(Instant::now()) {
                        self.publish_frame();
                    }
                }
            }
        }

        let SpectrogramView {
            scheduler,
            mut host,
            responses,
            ..
        } = self;
        // Stop draining first so a worker blocked on a full response channel
        // sees the close instead of deadlocking the shutdown handshake
        drop(responses);
        drop(scheduler);
        host.shutdown().await;
        log::info!("Spectrogram view stopped");
    }

    fn handle_command(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::LoadSource(source) => {
                self.load_source(source);
            }
            ViewCommand::Scroll(px) => {
                self.scheduler.set_scroll_offset(px);
            }
            ViewCommand::Resize(px) => {
                self.scheduler.set_viewport_width(px);
            }
            ViewCommand::Zoom(zoom) => {
                self.scheduler.set_zoom(zoom);
            }
            ViewCommand::Gain(gain) => {
                self.scheduler.set_gain(gain);
            }
            ViewCommand::Playhead(seconds) => {
                if seconds.is_finite() {
                    self.playhead_seconds = seconds.max(0.0);
                }
            }
            ViewCommand::Shutdown => {}
        }
    }

    /// Reloading the buffer that is already loaded keeps its version and
    /// cache, unless the worker gave up on it.
    fn load_source(&mut self, source: Arc<dyn DecodedAudio + Send + Sync>) {
        let same = self
            .source
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &source));
        if same && !self.scheduler.health().is_degraded() {
            if let Some(version) = self.scheduler.version() {
                log::debug!("Source {} already loaded", version);
                self.send_loaded(version);
                return;
            }
        }

        match self.scheduler.load_source(&*source) {
            Ok(version) => {
                self.source = Some(source);
                self.send_loaded(version);
            }
            Err(e) => {
                log::warn!("Rejected audio source: {}", e);
                let _ = self.events.send(ViewEvent::SourceRejected {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn send_loaded(&self, version: SourceVersion) {
        let _ = self.events.send(ViewEvent::SourceLoaded {
            version,
            duration_seconds: self.scheduler.duration_seconds().unwrap_or(0.0),
        });
    }

    fn publish_frame(&mut self) {
        match self.scheduler.health() {
            WorkerHealth::Degraded { reason, .. } if !self.reported_degraded => {
                self.reported_degraded = true;
                let _ = self.events.send(ViewEvent::Degraded {
                    reason: reason.clone(),
                });
            }
            WorkerHealth::Degraded { .. } => {}
            _ => self.reported_degraded = false,
        }

        let frame = compose(
            self.scheduler.render_list(),
            self.playhead_seconds,
            self.overlay.as_deref(),
        );
        let _ = self.events.send(ViewEvent::Frame(frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_reports_closed_view() {
        let (handle, rx) = view_channel();
        assert!(handle.scroll(10.0).is_ok());
        drop(rx);
        assert_eq!(handle.zoom(100.0), Err(ViewError::Closed));
    }
}
