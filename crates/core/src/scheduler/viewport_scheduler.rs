//! Decides which tiles the viewport needs, asks the worker for the missing
//! ones and assembles the render list.
//!
//! The scheduler is owned by a single task and never blocks: requests go out
//! through a [`RequestSink`] that fails fast, and every inbound event ends in
//! [`ViewportScheduler::recompute`]. Recompute is level-triggered, so calling
//! it again with nothing changed dispatches nothing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{DecodedAudio, SourceError, SourceSnapshot};
use crate::config::Settings;
use crate::messages::{SourceVersion, TileFailure, TileRequest, WorkerRequest, WorkerResponse};
use crate::tile::{
    total_width_px, visible_tile_range, GainKey, Raster, RequestTracker, TileCache,
    TileDescriptor, TileKey, ViewportGeometry, MAX_RENDER_WIDTH_PX, PREFETCH_MARGIN_TILES,
    RASTER_HEIGHT_PX, TILE_DURATION_SECONDS,
};

use super::sink::RequestSink;

pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 20_000.0;

const MAX_INIT_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulerState {
    /// No usable source; recompute produces an empty render list.
    Uninitialized,
    Ready {
        version: SourceVersion,
        duration_seconds: f64,
        sample_rate: u32,
    },
}

/// What the scheduler believes about the worker for the current source.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerHealth {
    Idle,
    /// `Init` sent, no answer yet.
    Initializing { attempt: u32 },
    Ready,
    /// Init failed; `attempt` is the number the retry will carry.
    RetryPending { attempt: u32, retry_at: Instant },
    /// Gave up on this source. Tiles stay placeholders until the next source.
    Degraded { attempts: u32, reason: String },
}

impl WorkerHealth {
    pub fn accepts_tiles(&self) -> bool {
        matches!(self, WorkerHealth::Initializing { .. } | WorkerHealth::Ready)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, WorkerHealth::Degraded { .. })
    }
}

/// Output of one recompute: everything the compositor needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderList {
    pub version: Option<SourceVersion>,
    pub zoom_px_per_second: f64,
    pub scroll_offset_px: f64,
    pub viewport_width_px: f64,
    pub total_width_px: f64,
    /// Ascending by index.
    pub tiles: Vec<TileDescriptor>,
    pub health: WorkerHealth,
}

impl RenderList {
    fn empty(
        zoom_px_per_second: f64,
        scroll_offset_px: f64,
        viewport_width_px: f64,
        health: WorkerHealth,
    ) -> Self {
        Self {
            version: None,
            zoom_px_per_second,
            scroll_offset_px,
            viewport_width_px,
            total_width_px: 0.0,
            tiles: Vec::new(),
            health,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn rendered_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_rendered()).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.tiles.len() - self.rendered_count()
    }
}

pub struct ViewportScheduler<S: RequestSink> {
    settings: Settings,
    sink: S,
    state: SchedulerState,
    health: WorkerHealth,
    last_version: SourceVersion,
    cache: TileCache,
    requests: RequestTracker,
    tile_failures: HashMap<TileKey, u32>,
    /// Keys the worker refused before its init finished. Not requested again
    /// until the init outcome arrives.
    awaiting_init: HashSet<TileKey>,
    /// Sample buffer handed back by a failed init, kept only until the retry.
    retry_samples: Option<Vec<f32>>,
    scroll_offset_px: f64,
    viewport_width_px: f64,
    zoom_px_per_second: f64,
    gain: f32,
    render_list: RenderList,
}

impl<S: RequestSink> ViewportScheduler<S> {
    pub fn new(settings: Settings, sink: S) -> Self {
        let zoom = clamp_zoom(settings.zoom_px_per_second).unwrap_or(500.0);
        let gain = if settings.gain.is_finite() && settings.gain >= 0.0 {
            settings.gain
        } else {
            9.0
        };
        let cache = TileCache::with_capacity(settings.cache_capacity_tiles);
        Self {
            settings,
            sink,
            state: SchedulerState::Uninitialized,
            health: WorkerHealth::Idle,
            last_version: SourceVersion(0),
            cache,
            requests: RequestTracker::new(),
            tile_failures: HashMap::new(),
            awaiting_init: HashSet::new(),
            retry_samples: None,
            scroll_offset_px: 0.0,
            viewport_width_px: 0.0,
            zoom_px_per_second: zoom,
            gain,
            render_list: RenderList::empty(zoom, 0.0, 0.0, WorkerHealth::Idle),
        }
    }

    /// Replace the audio source.
    ///
    /// Copies the first channel, drops every cached tile and reservation, and
    /// hands the copy to the worker. A rejected source leaves the current one
    /// in place. Every accepted call starts a new version, even for the same
    /// buffer; [`SpectrogramView`](crate::view::SpectrogramView) filters
    /// repeats.
    pub fn load_source(&mut self, source: &dyn DecodedAudio) -> Result<SourceVersion, SourceError> {
        let snapshot = SourceSnapshot::capture(source)?;

        let version = self.last_version.next();
        self.last_version = version;
        self.cache.clear();
        self.requests.clear();
        self.tile_failures.clear();
        self.awaiting_init.clear();
        self.retry_samples = None;
        self.state = SchedulerState::Ready {
            version,
            duration_seconds: snapshot.duration_seconds,
            sample_rate: snapshot.sample_rate,
        };

        log::info!(
            "Loading source {} ({:.2}s @ {} Hz, {} samples)",
            version,
            snapshot.duration_seconds,
            snapshot.sample_rate,
            snapshot.samples.len()
        );

        self.send_init(snapshot.samples, 1);
        self.recompute();
        Ok(version)
    }

    pub fn set_scroll_offset(&mut self, scroll_offset_px: f64) -> &RenderList {
        if scroll_offset_px.is_finite() {
            self.scroll_offset_px = scroll_offset_px.max(0.0);
        } else {
            log::warn!("Ignoring non-finite scroll offset {}", scroll_offset_px);
        }
        self.recompute()
    }

    pub fn set_viewport_width(&mut self, viewport_width_px: f64) -> &RenderList {
        if viewport_width_px.is_finite() {
            self.viewport_width_px = viewport_width_px.max(0.0);
        } else {
            log::warn!("Ignoring non-finite viewport width {}", viewport_width_px);
        }
        self.recompute()
    }

    /// Change zoom. Tile identity does not depend on zoom, so cached tiles are
    /// reused at their new on-screen size.
    pub fn set_zoom(&mut self, zoom_px_per_second: f64) -> &RenderList {
        match clamp_zoom(zoom_px_per_second) {
            Some(zoom) => self.zoom_px_per_second = zoom,
            None => log::warn!("Ignoring invalid zoom {}", zoom_px_per_second),
        }
        self.recompute()
    }

    /// Change gain. Tiles rendered at the previous gain stay cached.
    pub fn set_gain(&mut self, gain: f32) -> &RenderList {
        if gain.is_finite() && gain >= 0.0 {
            self.gain = gain;
        } else {
            log::warn!("Ignoring invalid gain {}", gain);
        }
        self.recompute()
    }

    pub fn handle_response(&mut self, response: WorkerResponse) -> &RenderList {
        let current = match self.state {
            SchedulerState::Ready { version, .. } => Some(version),
            SchedulerState::Uninitialized => None,
        };
        let version = response.version();
        if Some(version) != current {
            log::debug!(
                "Discarding response for stale source {} (current {:?})",
                version,
                current
            );
            return self.recompute();
        }

        match response {
            WorkerResponse::InitComplete { tile, .. } => {
                log::info!("Worker initialized for {}", version);
                self.health = WorkerHealth::Ready;
                self.retry_samples = None;
                self.awaiting_init.clear();
                if let Some((key, raster)) = tile {
                    self.store_tile(key, raster);
                }
            }
            WorkerResponse::InitFailed {
                reason, samples, ..
            } => match self.health {
                WorkerHealth::Initializing { attempt } => {
                    self.awaiting_init.clear();
                    self.init_failed(attempt, reason, samples);
                }
                _ => log::debug!("Ignoring unexpected init failure: {}", reason),
            },
            WorkerResponse::TileReady { key, raster, .. } => {
                log::debug!("Tile {} ready", key);
                self.store_tile(key, raster);
            }
            WorkerResponse::TileFailed { key, failure, .. } => {
                self.requests.release(&key);
                match failure {
                    // Expected while an init is in progress or failing. The key
                    // waits for the init outcome instead of counting a failure
                    TileFailure::NotInitialized if self.health != WorkerHealth::Ready => {
                        log::debug!("Tile {} requested before worker was ready", key);
                        self.awaiting_init.insert(key);
                    }
                    failure => self.record_tile_failure(key, &failure.to_string()),
                }
            }
        }

        self.recompute()
    }

    /// Fire due init retries and expire requests the worker never answered.
    ///
    /// Returns true when anything changed (the render list is then fresh).
    pub fn poll_timers(&mut self, now: Instant) -> bool {
        let mut changed = false;

        if let WorkerHealth::RetryPending { attempt, retry_at } = self.health {
            if now >= retry_at {
                if let Some(samples) = self.retry_samples.take() {
                    log::info!("Retrying worker init (attempt {})", attempt);
                    self.send_init(samples, attempt);
                    changed = true;
                }
            }
        }

        let expired = self.requests.expire(now, self.request_timeout());
        for key in &expired {
            self.record_tile_failure(*key, "request timed out");
        }
        changed |= !expired.is_empty();

        if changed {
            self.recompute();
        }
        changed
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        let retry = match self.health {
            WorkerHealth::RetryPending { retry_at, .. } => Some(retry_at),
            _ => None,
        };
        let expiry = self.requests.next_expiry(self.request_timeout());
        match (retry, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Rebuild the render list, dispatching requests for visible tiles that
    /// are neither cached nor in flight.
    pub fn recompute(&mut self) -> &RenderList {
        let (version, duration_seconds) = match self.state {
            SchedulerState::Ready {
                version,
                duration_seconds,
                ..
            } => (version, duration_seconds),
            SchedulerState::Uninitialized => {
                self.render_list = RenderList::empty(
                    self.zoom_px_per_second,
                    self.scroll_offset_px,
                    self.viewport_width_px,
                    self.health.clone(),
                );
                return &self.render_list;
            }
        };

        let range = visible_tile_range(&self.geometry(), duration_seconds, PREFETCH_MARGIN_TILES);
        self.cache.set_focus(range.clone(), GainKey::from_gain(self.gain));

        let mut tiles = Vec::with_capacity(range.len());
        for index in range {
            let mut descriptor = TileDescriptor::new(
                index,
                self.gain,
                TILE_DURATION_SECONDS,
                self.zoom_px_per_second,
                MAX_RENDER_WIDTH_PX,
            );
            descriptor.raster = self.cache.get(&descriptor.key);
            if descriptor.raster.is_none() && self.health.accepts_tiles() {
                self.request_tile(version, &descriptor);
            }
            tiles.push(descriptor);
        }

        self.render_list = RenderList {
            version: Some(version),
            zoom_px_per_second: self.zoom_px_per_second,
            scroll_offset_px: self.scroll_offset_px,
            viewport_width_px: self.viewport_width_px,
            total_width_px: total_width_px(duration_seconds, self.zoom_px_per_second),
            tiles,
            health: self.health.clone(),
        };
        &self.render_list
    }

    pub fn render_list(&self) -> &RenderList {
        &self.render_list
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn requests(&self) -> &RequestTracker {
        &self.requests
    }

    pub fn health(&self) -> &WorkerHealth {
        &self.health
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn version(&self) -> Option<SourceVersion> {
        match self.state {
            SchedulerState::Ready { version, .. } => Some(version),
            SchedulerState::Uninitialized => None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn zoom_px_per_second(&self) -> f64 {
        self.zoom_px_per_second
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn scroll_offset_px(&self) -> f64 {
        self.scroll_offset_px
    }

    pub fn viewport_width_px(&self) -> f64 {
        self.viewport_width_px
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match self.state {
            SchedulerState::Ready {
                duration_seconds, ..
            } => Some(duration_seconds),
            SchedulerState::Uninitialized => None,
        }
    }

    fn geometry(&self) -> ViewportGeometry {
        ViewportGeometry {
            scroll_offset_px: self.scroll_offset_px,
            viewport_width_px: self.viewport_width_px,
            zoom_px_per_second: self.zoom_px_per_second,
            tile_duration_seconds: TILE_DURATION_SECONDS,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.request_timeout_ms)
    }

    fn request_tile(&mut self, version: SourceVersion, descriptor: &TileDescriptor) {
        let key = descriptor.key;
        let failures = self.tile_failures.get(&key).copied().unwrap_or(0);
        if failures >= self.settings.max_tile_attempts || self.awaiting_init.contains(&key) {
            return;
        }
        if !self.requests.try_reserve(key) {
            return;
        }

        let spec = TileRequest {
            key,
            start_time_seconds: descriptor.start_time_seconds,
            end_time_seconds: descriptor.end_time_seconds,
            gain: key.gain.value(),
            render_width_px: descriptor.render_width_px,
            raster_height_px: RASTER_HEIGHT_PX,
        };
        log::debug!(
            "Requesting tile {} ({:.1}s-{:.1}s, {}px)",
            key,
            spec.start_time_seconds,
            spec.end_time_seconds,
            spec.render_width_px
        );

        if let Err(e) = self.sink.send(WorkerRequest::GetTile { version, spec }) {
            self.requests.release(&key);
            if e.is_closed() {
                self.degrade(self.current_attempt(), "worker channel closed".to_string());
            } else {
                log::debug!("Worker busy, tile {} deferred", key);
            }
        }
    }

    fn store_tile(&mut self, key: TileKey, raster: Raster) {
        self.requests.release(&key);
        self.tile_failures.remove(&key);
        self.cache.put(key, Arc::new(raster));
    }

    fn record_tile_failure(&mut self, key: TileKey, reason: &str) {
        let count = self.tile_failures.entry(key).or_insert(0);
        *count += 1;
        if *count >= self.settings.max_tile_attempts {
            log::warn!(
                "Giving up on tile {} after {} attempts: {}",
                key,
                count,
                reason
            );
        } else {
            log::warn!("Tile {} failed (attempt {}): {}", key, count, reason);
        }
    }

    fn send_init(&mut self, samples: Vec<f32>, attempt: u32) {
        let (version, sample_rate) = match self.state {
            SchedulerState::Ready {
                version,
                sample_rate,
                ..
            } => (version, sample_rate),
            SchedulerState::Uninitialized => return,
        };

        let request = WorkerRequest::Init {
            version,
            samples,
            sample_rate,
        };
        match self.sink.send(request) {
            Ok(()) => self.health = WorkerHealth::Initializing { attempt },
            Err(e) => {
                let closed = e.is_closed();
                let reason = e.to_string();
                let samples = match e.into_request() {
                    WorkerRequest::Init { samples, .. } => Some(samples),
                    _ => None,
                };
                if closed {
                    self.degrade(attempt, reason);
                } else {
                    self.init_failed(attempt, reason, samples);
                }
            }
        }
    }

    fn init_failed(&mut self, attempt: u32, reason: String, samples: Option<Vec<f32>>) {
        match samples {
            Some(samples) if attempt < self.settings.max_init_attempts => {
                let delay = init_backoff(self.settings.init_backoff_ms, attempt);
                log::warn!(
                    "Worker init attempt {} failed: {}; retrying in {:?}",
                    attempt,
                    reason,
                    delay
                );
                self.retry_samples = Some(samples);
                self.health = WorkerHealth::RetryPending {
                    attempt: attempt + 1,
                    retry_at: Instant::now() + delay,
                };
            }
            Some(_) => self.degrade(attempt, reason),
            None => self.degrade(attempt, format!("{} (sample buffer lost)", reason)),
        }
    }

    fn degrade(&mut self, attempts: u32, reason: String) {
        log::error!(
            "Worker degraded after {} attempt(s): {}",
            attempts,
            reason
        );
        self.retry_samples = None;
        self.awaiting_init.clear();
        self.health = WorkerHealth::Degraded { attempts, reason };
    }

    fn current_attempt(&self) -> u32 {
        match self.health {
            WorkerHealth::Initializing { attempt } => attempt,
            WorkerHealth::RetryPending { attempt, .. } => attempt.saturating_sub(1),
            WorkerHealth::Degraded { attempts, .. } => attempts,
            WorkerHealth::Idle | WorkerHealth::Ready => 1,
        }
    }
}

fn clamp_zoom(zoom_px_per_second: f64) -> Option<f64> {
    if !zoom_px_per_second.is_finite() || zoom_px_per_second <= 0.0 {
        return None;
    }
    Some(zoom_px_per_second.clamp(MIN_ZOOM, MAX_ZOOM))
}

/// `base * 2^(attempt - 1)`, capped.
pub fn init_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_INIT_BACKOFF)
}
