use std::time::{Duration, Instant};

use spectra_core::{
    MonoBuffer, Raster, RequestSink, SchedulerState, SendError, Settings, SourceVersion,
    TileFailure, TileKey, ViewportScheduler, WorkerHealth, WorkerRequest, WorkerResponse,
};

/// Sink that can be switched to refuse requests.
#[derive(Default)]
struct TestSink {
    sent: Vec<WorkerRequest>,
    full: bool,
}

impl RequestSink for TestSink {
    fn send(&mut self, request: WorkerRequest) -> Result<(), SendError> {
        if self.full {
            return Err(SendError::Full(request));
        }
        self.sent.push(request);
        Ok(())
    }
}

impl TestSink {
    fn tile_keys(&self) -> Vec<TileKey> {
        self.sent
            .iter()
            .filter_map(|r| match r {
                WorkerRequest::GetTile { spec, .. } => Some(spec.key),
                _ => None,
            })
            .collect()
    }

    fn init_count(&self) -> usize {
        self.sent
            .iter()
            .filter(|r| matches!(r, WorkerRequest::Init { .. }))
            .count()
    }

    fn take_init_samples(&mut self) -> Option<Vec<f32>> {
        let index = self
            .sent
            .iter()
            .rposition(|r| matches!(r, WorkerRequest::Init { .. }))?;
        match self.sent.remove(index) {
            WorkerRequest::Init { samples, .. } => Some(samples),
            _ => None,
        }
    }
}

fn settings() -> Settings {
    Settings::default()
}

/// `seconds` of silence at 100 Hz.
fn source(seconds: usize) -> MonoBuffer {
    MonoBuffer::new(vec![0.0; seconds * 100], 100)
}

fn ready_scheduler(seconds: usize, width: f64) -> (ViewportScheduler<TestSink>, SourceVersion) {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    s.set_viewport_width(width);
    let version = s.load_source(&source(seconds)).unwrap();
    s.handle_response(WorkerResponse::InitComplete { version, tile: None });
    (s, version)
}

fn ready(version: SourceVersion, key: TileKey) -> WorkerResponse {
    WorkerResponse::TileReady {
        version,
        key,
        raster: Raster::solid(8, 4, [key.index as u8, 0, 0, 255]),
    }
}

fn indices(s: &ViewportScheduler<TestSink>) -> Vec<usize> {
    s.render_list().tiles.iter().map(|t| t.key.index).collect()
}

#[test]
fn test_scenario_a_partial_last_tile() {
    let (s, _) = ready_scheduler(12, 10_000.0);
    let list = s.render_list();
    assert_eq!(indices(&s), vec![0, 1, 2]);

    let last = &list.tiles[2];
    assert_eq!(last.start_time_seconds, 10.0);
    assert_eq!(last.audible_end_seconds(12.0), 12.0);
    assert_eq!(list.total_width_px, 6000.0);
}

#[test]
fn test_scenario_b_visible_range_with_margin() {
    let (mut s, _) = ready_scheduler(60, 500.0);
    s.set_scroll_offset(1000.0);
    assert_eq!(indices(&s), vec![0, 1, 2]);
}

#[test]
fn test_scenario_c_gain_toggle_hits_cache() {
    let (mut s, version) = ready_scheduler(12, 10_000.0);
    for key in s.sink().tile_keys() {
        s.handle_response(ready(version, key));
    }
    assert_eq!(s.render_list().rendered_count(), 3);

    s.sink_mut().sent.clear();
    s.set_gain(12.0);
    let keys = s.sink().tile_keys();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| *k == TileKey::new(k.index, 12.0)));
    assert_eq!(s.render_list().rendered_count(), 0);

    s.sink_mut().sent.clear();
    s.set_gain(9.0);
    assert!(s.sink().tile_keys().is_empty());
    assert_eq!(s.render_list().rendered_count(), 3);
}

#[test]
fn test_scenario_d_out_of_order_completions() {
    let (mut s, version) = ready_scheduler(12, 10_000.0);
    for index in [2, 0, 1] {
        s.handle_response(ready(version, TileKey::new(index, 9.0)));
    }
    assert_eq!(s.render_list().rendered_count(), 3);
    assert!(s.requests().is_empty());
    assert_eq!(s.cache().len(), 3);
}

#[test]
fn test_exactly_one_request_per_uncached_key() {
    let (mut s, _) = ready_scheduler(60, 500.0);
    s.recompute();
    s.set_scroll_offset(0.0);
    s.recompute();

    let mut keys = s.sink().tile_keys();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
    assert_eq!(total, 3);
    assert_eq!(s.requests().len(), 3);
}

#[test]
fn test_recompute_is_idempotent() {
    let (mut s, version) = ready_scheduler(12, 10_000.0);
    for key in s.sink().tile_keys() {
        s.handle_response(ready(version, key));
    }
    let before = s.render_list().clone();
    let sent = s.sink().sent.len();

    let after = s.recompute().clone();
    assert_eq!(before, after);
    assert_eq!(s.sink().sent.len(), sent);
}

#[test]
fn test_source_change_clears_cache_and_discards_stale() {
    let (mut s, v1) = ready_scheduler(12, 10_000.0);
    s.handle_response(ready(v1, TileKey::new(0, 9.0)));
    assert_eq!(s.cache().len(), 1);

    let v2 = s.load_source(&source(30)).unwrap();
    assert!(v2 > v1);
    assert!(s.cache().is_empty());
    assert_eq!(s.health(), &WorkerHealth::Initializing { attempt: 1 });

    s.handle_response(ready(v1, TileKey::new(1, 9.0)));
    assert!(s.cache().is_empty());

    s.handle_response(ready(v2, TileKey::new(1, 9.0)));
    assert_eq!(s.cache().len(), 1);
}

#[test]
fn test_zoom_change_keeps_cache() {
    let (mut s, version) = ready_scheduler(12, 10_000.0);
    for key in s.sink().tile_keys() {
        s.handle_response(ready(version, key));
    }
    s.sink_mut().sent.clear();

    s.set_zoom(250.0);
    assert!(s.sink().tile_keys().is_empty());
    let list = s.render_list();
    assert_eq!(list.rendered_count(), 3);
    assert_eq!(list.tiles[1].left_px, 1250.0);
}

#[test]
fn test_init_complete_side_effect_tile_is_cached() {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    s.set_viewport_width(10_000.0);
    let version = s.load_source(&source(12)).unwrap();
    s.handle_response(WorkerResponse::InitComplete {
        version,
        tile: Some((TileKey::new(0, 9.0), Raster::solid(2, 2, [0, 0, 0, 255]))),
    });
    assert_eq!(s.health(), &WorkerHealth::Ready);
    assert!(s.render_list().tiles[0].is_rendered());
    assert!(!s.requests().is_reserved(&TileKey::new(0, 9.0)));
}

#[test]
fn test_tile_failure_retries_until_cap() {
    let (mut s, version) = ready_scheduler(4, 100.0);
    let key = TileKey::new(0, 9.0);
    assert_eq!(s.sink().tile_keys(), vec![key]);

    for _ in 0..settings().max_tile_attempts {
        s.handle_response(WorkerResponse::TileFailed {
            version,
            key,
            failure: TileFailure::Compute("nan in input".to_string()),
        });
    }

    // initial request plus one retry per failure but the last
    let attempts = s.sink().tile_keys().iter().filter(|k| **k == key).count();
    assert_eq!(attempts, settings().max_tile_attempts as usize);
    assert!(!s.requests().is_reserved(&key));
    assert_eq!(s.render_list().placeholder_count(), 1);
}

#[test]
fn test_not_initialized_during_init_is_not_counted() {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    s.set_viewport_width(100.0);
    let version = s.load_source(&source(4)).unwrap();
    let key = TileKey::new(0, 9.0);

    for _ in 0..10 {
        s.handle_response(WorkerResponse::TileFailed {
            version,
            key,
            failure: TileFailure::NotInitialized,
        });
    }
    s.handle_response(WorkerResponse::InitComplete { version, tile: None });
    assert!(s.requests().is_reserved(&key));

    // One request before init, one after
    let sent = s.sink().tile_keys().iter().filter(|k| **k == key).count();
    assert_eq!(sent, 2);

    // Still retryable the full number of times once ready
    for _ in 0..settings().max_tile_attempts - 1 {
        s.handle_response(WorkerResponse::TileFailed {
            version,
            key,
            failure: TileFailure::Compute("glitch".to_string()),
        });
        assert!(s.requests().is_reserved(&key));
    }
}

#[test]
fn test_not_initialized_replies_do_not_spin_during_init() {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    s.set_viewport_width(100.0);
    let version = s.load_source(&source(4)).unwrap();
    let key = TileKey::new(0, 9.0);

    for _ in 0..1000 {
        s.handle_response(WorkerResponse::TileFailed {
            version,
            key,
            failure: TileFailure::NotInitialized,
        });
        s.recompute();
    }
    assert_eq!(s.health(), &WorkerHealth::Initializing { attempt: 1 });
    assert_eq!(s.sink().tile_keys(), vec![key]);
    assert!(!s.requests().is_reserved(&key));
    assert_eq!(s.render_list().placeholder_count(), 1);

    // A failed init lets the retry ask again
    let samples = s.sink_mut().take_init_samples();
    s.handle_response(WorkerResponse::InitFailed {
        version,
        reason: "still loading".to_string(),
        samples,
    });
    let retry_at = match s.health() {
        WorkerHealth::RetryPending { retry_at, .. } => *retry_at,
        other => panic!("expected retry, got {:?}", other),
    };
    assert!(s.poll_timers(retry_at));
    assert_eq!(s.sink().tile_keys(), vec![key, key]);
}

#[test]
fn test_init_failure_backs_off_then_degrades() {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    s.set_viewport_width(100.0);
    let version = s.load_source(&source(4)).unwrap();
    let max = settings().max_init_attempts;

    for attempt in 1..=max {
        assert_eq!(s.health(), &WorkerHealth::Initializing { attempt });
        let samples = s.sink_mut().take_init_samples();
        assert!(samples.is_some());
        s.sink_mut().sent.clear();

        s.handle_response(WorkerResponse::InitFailed {
            version,
            reason: "no memory".to_string(),
            samples,
        });
        if attempt == max {
            break;
        }

        let retry_at = match s.health() {
            WorkerHealth::RetryPending { attempt: next, retry_at } => {
                assert_eq!(*next, attempt + 1);
                *retry_at
            }
            other => panic!("expected retry, got {:?}", other),
        };
        // Nothing goes out while waiting
        s.recompute();
        assert!(s.sink().sent.is_empty());
        assert!(s.next_deadline().unwrap() <= retry_at);

        assert!(s.poll_timers(retry_at));
        assert_eq!(s.sink().init_count(), 1);
    }

    assert!(matches!(
        s.health(),
        WorkerHealth::Degraded { attempts, .. } if *attempts == max
    ));
    assert!(s.render_list().health.is_degraded());
    assert_eq!(s.render_list().placeholder_count(), 1);
    s.recompute();
    assert!(s.sink().tile_keys().is_empty());
}

#[test]
fn test_init_failure_without_buffer_degrades_immediately() {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    let version = s.load_source(&source(4)).unwrap();
    s.handle_response(WorkerResponse::InitFailed {
        version,
        reason: "worker crashed".to_string(),
        samples: None,
    });
    assert!(s.health().is_degraded());
    assert!(s.recompute().health.is_degraded());
}

#[test]
fn test_new_source_recovers_from_degraded() {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    let version = s.load_source(&source(4)).unwrap();
    s.handle_response(WorkerResponse::InitFailed {
        version,
        reason: "bad".to_string(),
        samples: None,
    });
    assert!(s.health().is_degraded());

    s.load_source(&source(4)).unwrap();
    assert_eq!(s.health(), &WorkerHealth::Initializing { attempt: 1 });
}

#[test]
fn test_timed_out_request_is_retried() {
    let (mut s, _) = ready_scheduler(4, 100.0);
    let key = TileKey::new(0, 9.0);
    s.sink_mut().sent.clear();

    let timeout = Duration::from_millis(settings().request_timeout_ms);
    assert!(!s.poll_timers(Instant::now()));
    assert!(s.poll_timers(Instant::now() + timeout + Duration::from_millis(5)));
    assert_eq!(s.sink().tile_keys(), vec![key]);
    assert!(s.requests().is_reserved(&key));
}

#[test]
fn test_full_channel_defers_without_reserving() {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    s.set_viewport_width(100.0);
    let version = s.load_source(&source(4)).unwrap();
    s.handle_response(WorkerResponse::InitComplete { version, tile: None });
    s.sink_mut().sent.clear();
    s.handle_response(ready(version, TileKey::new(0, 9.0)));

    s.sink_mut().full = true;
    s.set_gain(3.0);
    assert!(s.requests().is_empty());

    s.sink_mut().full = false;
    s.recompute();
    assert_eq!(s.sink().tile_keys(), vec![TileKey::new(0, 3.0)]);
}

#[test]
fn test_full_channel_on_init_schedules_retry() {
    let mut s = ViewportScheduler::new(
        settings(),
        TestSink {
            sent: Vec::new(),
            full: true,
        },
    );
    s.load_source(&source(4)).unwrap();
    let retry_at = match s.health() {
        WorkerHealth::RetryPending { retry_at, .. } => *retry_at,
        other => panic!("expected retry, got {:?}", other),
    };

    s.sink_mut().full = false;
    s.poll_timers(retry_at);
    assert_eq!(s.sink().init_count(), 1);
    assert_eq!(s.health(), &WorkerHealth::Initializing { attempt: 2 });
}

#[test]
fn test_rejected_source_reports_uninitialized() {
    let mut s = ViewportScheduler::new(settings(), TestSink::default());
    assert!(s.load_source(&MonoBuffer::new(vec![1.0], 0)).is_err());
    assert_eq!(s.state(), SchedulerState::Uninitialized);
    assert!(s.recompute().tiles.is_empty());
}

#[test]
fn test_bounded_cache_never_evicts_visible_tiles() {
    let mut s = ViewportScheduler::new(
        Settings {
            cache_capacity_tiles: Some(1),
            ..settings()
        },
        TestSink::default(),
    );
    s.set_viewport_width(10_000.0);
    let version = s.load_source(&source(12)).unwrap();
    s.handle_response(WorkerResponse::InitComplete { version, tile: None });
    for index in 0..3 {
        s.handle_response(ready(version, TileKey::new(index, 9.0)));
    }
    assert_eq!(s.render_list().rendered_count(), 3);
}
