//! Classified per-name hit counting.
//!
//! Couples the query-name counter with a cache of name classifications so
//! both observe one consistent count when deciding whether a refresh is due.
//! The external catalog lookup runs outside the table lock; an in-flight
//! marker makes the decide-and-claim step atomic, so two hits for the same
//! name can never race to cache different answers.

use parking_lot::Mutex;
use prometheus::IntGaugeVec;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use crate::catalog::{self, DomainCatalog};
use crate::config::RefreshPolicy;

/// Classification reported when a name resolves to no labels.
pub const UNCLASSIFIED: &str = "null";

/// Result of recording one classified hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedHit {
    /// Post-increment count for the name.
    pub count: u64,
    /// Classification the hit was exported under.
    pub classification: String,
}

#[derive(Default)]
struct ClassifyInner {
    counts: HashMap<String, u64>,
    labels: HashMap<String, String>,
    in_flight: HashSet<String>,
}

/// Per-name hit counter with cached classifications.
pub struct ClassifiedCounters {
    catalog: Arc<dyn DomainCatalog>,
    policy: RefreshPolicy,
    gauge: IntGaugeVec,
    inner: Mutex<ClassifyInner>,
}

impl ClassifiedCounters {
    /// Create a counter over `catalog`, exporting through `gauge`
    /// (`query_name` and `classification` label dimensions).
    pub fn new(catalog: Arc<dyn DomainCatalog>, policy: RefreshPolicy, gauge: IntGaugeVec) -> Self {
        Self {
            catalog,
            policy,
            gauge,
            inner: Mutex::new(ClassifyInner::default()),
        }
    }

    /// Count one hit for `name` and export it under the name's current
    /// classification.
    ///
    /// A refresh is due on a cache miss or, under the periodic policy, when
    /// the new count crosses a period boundary. The increment never blocks
    /// on the catalog beyond its own refresh: a failed lookup falls back to
    /// the previous cached value, or [`UNCLASSIFIED`] when there is none.
    pub async fn record(&self, name: &str) -> ClassifiedHit {
        let (count, refresh, cached) = {
            let mut inner = self.inner.lock();
            let count = {
                let count = inner.counts.entry(name.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            let cached = inner.labels.get(name).cloned();
            let due = cached.is_none() || self.refresh_due(count);
            let refresh = due && inner.in_flight.insert(name.to_string());
            (count, refresh, cached)
        };

        let classification = if refresh {
            let looked_up = self.lookup(name).await;
            let mut inner = self.inner.lock();
            inner.in_flight.remove(name);
            match looked_up {
                Some(serialized) => {
                    inner.labels.insert(name.to_string(), serialized.clone());
                    serialized
                }
                // Lookup failed: keep whatever we had.
                None => inner
                    .labels
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| UNCLASSIFIED.to_string()),
            }
        } else {
            cached.unwrap_or_else(|| UNCLASSIFIED.to_string())
        };

        self.gauge
            .with_label_values(&[name, &classification])
            .set(count as i64);

        ClassifiedHit {
            count,
            classification,
        }
    }

    fn refresh_due(&self, count: u64) -> bool {
        match self.policy {
            RefreshPolicy::LazyOnce => false,
            // A period of 1 means every hit; `count % 1 == 1` never holds.
            RefreshPolicy::Periodic { every: 0 } => false,
            RefreshPolicy::Periodic { every: 1 } => true,
            RefreshPolicy::Periodic { every } => count % every == 1,
        }
    }

    async fn lookup(&self, name: &str) -> Option<String> {
        match catalog::lookup_labels(self.catalog.as_ref(), name).await {
            Ok(labels) => Some(serialize_labels(&labels)),
            Err(e) => {
                warn!(name, error = %e, "classification lookup failed, keeping cached value");
                None
            }
        }
    }

    /// Current classification for `name`, if cached.
    pub fn classification(&self, name: &str) -> Option<String> {
        self.inner.lock().labels.get(name).cloned()
    }

    /// Current count for `name`, zero when absent.
    pub fn count(&self, name: &str) -> u64 {
        self.inner.lock().counts.get(name).copied().unwrap_or(0)
    }

    /// Seed a restored hit count for `name`. The classification is left
    /// uncached on purpose: the next hit is a cache miss and fetches a
    /// fresh one.
    pub fn seed_count(&self, name: &str, count: u64) {
        self.inner.lock().counts.insert(name.to_string(), count);
    }
}

/// Serialize a label set: deduplicate, sort, join with commas. An empty set
/// becomes [`UNCLASSIFIED`].
pub fn serialize_labels(labels: &[String]) -> String {
    let set: BTreeSet<&str> = labels.iter().map(String::as_str).collect();
    if set.is_empty() {
        return UNCLASSIFIED.to_string();
    }
    set.into_iter().collect::<Vec<_>>().join(",")
}
