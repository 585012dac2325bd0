use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spectra_core::{
    view_channel, ConfigManager, DecodedAudio, Frame, Settings, SpectrogramView, TimedLabels,
    ViewEvent, WorkerHost, TILE_DURATION_SECONDS,
};
use spectra_dsp::{decode_file, StftWorker};
use tokio::sync::mpsc;

/// Render a spectrogram of an audio file through the tiled viewport and
/// report what each scroll position would draw.
#[derive(Parser, Debug)]
#[command(name = "spectra")]
#[command(about = "Tiled spectrogram viewport driver")]
struct Args {
    /// Audio file to analyze (wav, mp3, aiff, flac)
    input: PathBuf,

    /// Settings file (created with defaults if missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Zoom in pixels per second, overrides the settings file
    #[arg(long)]
    zoom: Option<f64>,

    /// Gain, overrides the settings file
    #[arg(long)]
    gain: Option<f32>,

    /// Width of the simulated viewport in pixels
    #[arg(long, default_value = "1200")]
    viewport_width: f64,

    /// Number of scroll positions to visit between start and end
    #[arg(long, default_value = "8")]
    steps: u32,

    /// How long to wait for tiles at each scroll position
    #[arg(long, default_value = "2000")]
    settle_ms: u64,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => {
            let mut manager = ConfigManager::new(Some(path.clone()));
            manager.load()?
        }
        None => Settings::default(),
    };
    if let Some(zoom) = args.zoom {
        settings.zoom_px_per_second = zoom;
    }
    if let Some(gain) = args.gain {
        settings.gain = gain;
    }
    ConfigManager::validate_settings(&settings)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args, settings))
}

async fn run(args: Args, settings: Settings) -> Result<(), anyhow::Error> {
    let path = args.input.clone();
    let audio = tokio::task::spawn_blocking(move || decode_file(path)).await??;

    let worker = StftWorker::from_settings(&settings);
    let (host, responses) = WorkerHost::spawn(worker, settings.channel_capacity);
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (handle, commands) = view_channel();

    let zoom = settings.zoom_px_per_second;
    let view = SpectrogramView::new(settings, host, responses, event_tx)
        .with_overlay(Box::new(tile_ruler(audio.duration_seconds())));
    let view_task = tokio::spawn(view.run(commands));

    handle.resize(args.viewport_width)?;
    handle.load_source(Arc::new(audio))?;

    let duration_seconds = loop {
        match events.recv().await {
            Some(ViewEvent::SourceLoaded {
                version,
                duration_seconds,
            }) => {
                log::info!("Source {} loaded, {:.2}s", version, duration_seconds);
                break duration_seconds;
            }
            Some(ViewEvent::SourceRejected { reason }) => {
                handle.shutdown()?;
                view_task.await?;
                anyhow::bail!("Source rejected: {}", reason);
            }
            Some(_) => {}
            None => anyhow::bail!("View stopped before the source loaded"),
        }
    };

    let max_scroll = (duration_seconds * zoom - args.viewport_width).max(0.0);
    let settle = Duration::from_millis(args.settle_ms);
    let steps = args.steps.max(1);

    for step in 0..=steps {
        let scroll = max_scroll * step as f64 / steps as f64;
        handle.scroll(scroll)?;
        handle.playhead(scroll / zoom)?;

        match settle_frame(&mut events, scroll, settle).await? {
            Some(frame) => log::info!(
                "Step {}/{}: scroll {:.0}px of {:.0}px, {} rasters, {} placeholders{}",
                step,
                steps,
                scroll,
                frame.total_width_px,
                frame.raster_count(),
                frame.placeholder_count(),
                if frame.degraded { " (degraded)" } else { "" }
            ),
            None => log::warn!("Step {}/{}: no frame at scroll {:.0}px", step, steps, scroll),
        }
    }

    handle.shutdown()?;
    view_task.await?;
    log::info!("Done");
    Ok(())
}

/// Collect frames for `scroll` until every tile is drawn or `settle` passes.
async fn settle_frame(
    events: &mut mpsc::UnboundedReceiver<ViewEvent>,
    scroll: f64,
    settle: Duration,
) -> Result<Option<Frame>, anyhow::Error> {
    let deadline = tokio::time::Instant::now() + settle;
    let mut last = None;

    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(ViewEvent::Frame(frame))) => {
                if frame.scroll_offset_px != scroll {
                    continue;
                }
                let complete = frame.placeholder_count() == 0;
                last = Some(frame);
                if complete {
                    break;
                }
            }
            Ok(Some(ViewEvent::Degraded { reason })) => {
                log::error!("Worker degraded: {}", reason);
            }
            Ok(Some(_)) => {}
            Ok(None) => anyhow::bail!("View stopped unexpectedly"),
            Err(_) => break,
        }
    }

    Ok(last)
}

/// A `m:ss` label at the start of every tile.
fn tile_ruler(duration_seconds: f64) -> TimedLabels {
    let tiles = (duration_seconds / TILE_DURATION_SECONDS).ceil() as usize;
    TimedLabels::new(
        (0..tiles)
            .map(|i| {
                let seconds = i as f64 * TILE_DURATION_SECONDS;
                let whole = seconds as u64;
                (seconds, format!("{}:{:02}", whole / 60, whole % 60))
            })
            .collect(),
    )
}
