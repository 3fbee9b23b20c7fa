//! Per-minute deduplication of query source addresses.

use parking_lot::Mutex;
use prometheus::IntGauge;
use std::collections::{HashMap, HashSet};

/// Seconds per aggregation bucket.
const BUCKET_SECS: i64 = 60;

#[derive(Default)]
struct WindowState {
    buckets: HashMap<i64, HashSet<String>>,
    /// Bucket the gauge was last published from.
    current: i64,
}

/// Tracks distinct query sources per minute bucket.
///
/// At most two buckets are retained: the minute an event falls into and the
/// one before it. Eviction runs on the write path, inside the same critical
/// section as the insert, so readers never observe the gauge ahead of the
/// set it summarizes. A late event with a stale timestamp recreates its
/// bucket and the next newer write evicts it again.
pub struct SourceWindow {
    gauge: IntGauge,
    state: Mutex<WindowState>,
}

impl SourceWindow {
    /// Create a window publishing through `gauge`.
    pub fn new(gauge: IntGauge) -> Self {
        Self {
            gauge,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Record one sighting of `source` at `at_secs` (seconds since the Unix
    /// epoch, taken from the event's timestamp).
    pub fn record(&self, source: &str, at_secs: i64) {
        let bucket = at_secs / BUCKET_SECS;
        let mut state = self.state.lock();
        let entry = state.buckets.entry(bucket).or_default();
        entry.insert(source.to_string());
        let unique = entry.len();
        state.buckets.retain(|&b, _| b >= bucket - 1);
        state.current = bucket;
        self.gauge.set(unique as i64);
    }

    /// Distinct sources in the last-written bucket, the same set the gauge
    /// reports. A late event moves both to its own bucket until the next
    /// newer write.
    pub fn current_unique(&self) -> usize {
        let state = self.state.lock();
        state
            .buckets
            .get(&state.current)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Number of retained buckets.
    pub fn bucket_count(&self) -> usize {
        self.state.lock().buckets.len()
    }
}
