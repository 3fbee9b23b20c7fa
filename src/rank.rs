//! Periodic top-N publication of the busiest query sources.

use prometheus::IntGaugeVec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::counters::CounterTable;

/// Publish the `size` highest counts from `table` into `gauge`.
///
/// The family is reset first so entries that fell out of the top set stop
/// being reported. Ties are broken by key, ascending, to keep successive
/// publications stable. Returns how many entries were published.
pub fn publish_top(table: &CounterTable, gauge: &IntGaugeVec, size: usize) -> usize {
    let mut entries = table.snapshot();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(size);

    gauge.reset();
    for (key, count) in &entries {
        gauge.with_label_values(&[key]).set(*count as i64);
    }
    entries.len()
}

/// Run [`publish_top`] every `interval` until `shutdown` fires.
pub async fn run(
    table: Arc<CounterTable>,
    gauge: IntGaugeVec,
    size: usize,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so the first publication
    // covers a full interval.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("top source publisher shutting down");
                return;
            }

            _ = ticker.tick() => {
                let published = publish_top(&table, &gauge, size);
                debug!(published, tracked = table.len(), "published top query sources");
            }
        }
    }
}
