//! In-flight request bookkeeping.
//!
//! Together with the [`TileCache`](super::TileCache) this partitions every key
//! into "not requested", "awaiting result" or "cached". A key is reserved
//! right before its `GetTile` request goes out and released when the result
//! lands, the request fails, or the reservation times out.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::geometry::TileKey;

#[derive(Debug, Default)]
pub struct RequestTracker {
    in_flight: HashMap<TileKey, Instant>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `key` for a new request. Returns `false` if it is already in flight.
    pub fn try_reserve(&mut self, key: TileKey) -> bool {
        if self.in_flight.contains_key(&key) {
            return false;
        }
        self.in_flight.insert(key, Instant::now());
        true
    }

    /// Forget a reservation so the key can be requested again.
    pub fn release(&mut self, key: &TileKey) -> bool {
        self.in_flight.remove(key).is_some()
    }

    pub fn is_reserved(&self, key: &TileKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Release every reservation older than `timeout` and return the keys.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<TileKey> {
        let mut expired: Vec<TileKey> = self
            .in_flight
            .iter()
            .filter(|(_, reserved_at)| now.saturating_duration_since(**reserved_at) >= timeout)
            .map(|(key, _)| *key)
            .collect();
        expired.sort();
        for key in &expired {
            self.in_flight.remove(key);
        }
        expired
    }

    /// When the oldest reservation will time out.
    pub fn next_expiry(&self, timeout: Duration) -> Option<Instant> {
        self.in_flight.values().min().map(|at| *at + timeout)
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
