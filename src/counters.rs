//! Keyed monotonic counters with exported values.

use parking_lot::RwLock;
use prometheus::IntGaugeVec;
use std::collections::HashMap;

/// A keyed, monotonically increasing counter table.
///
/// Every increment publishes the post-increment value to the table's gauge
/// family under the key's label, inside the same critical section as the
/// update, so the registry always carries the running total. Tables built
/// with [`CounterTable::unexported`] keep no family of their own and are
/// read through [`CounterTable::snapshot`] instead.
pub struct CounterTable {
    gauge: Option<IntGaugeVec>,
    counts: RwLock<HashMap<String, u64>>,
}

impl CounterTable {
    /// Create a table exporting through `gauge` (one label dimension).
    pub fn new(gauge: IntGaugeVec) -> Self {
        Self {
            gauge: Some(gauge),
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Create a table with no exported family of its own.
    pub fn unexported() -> Self {
        Self {
            gauge: None,
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Increment `key` by one and return the new value.
    pub fn increment(&self, key: &str) -> u64 {
        let mut counts = self.counts.write();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        let value = *count;
        if let Some(gauge) = &self.gauge {
            gauge.with_label_values(&[key]).set(value as i64);
        }
        value
    }

    /// Current value for `key`, zero when absent.
    pub fn get(&self, key: &str) -> u64 {
        self.counts.read().get(key).copied().unwrap_or(0)
    }

    /// Seed `key` with a restored value and publish it. Runs at startup,
    /// before any event is consumed; an existing entry is overwritten.
    pub fn seed(&self, key: &str, value: u64) {
        let mut counts = self.counts.write();
        counts.insert(key.to_string(), value);
        if let Some(gauge) = &self.gauge {
            gauge.with_label_values(&[key]).set(value as i64);
        }
    }

    /// Snapshot of every `(key, count)` pair.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.counts
            .read()
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.counts.read().len()
    }

    /// Whether the table tracks no keys.
    pub fn is_empty(&self) -> bool {
        self.counts.read().is_empty()
    }
}
