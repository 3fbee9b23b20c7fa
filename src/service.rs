//! The monitor service: owns the aggregation state, consumes the activity
//! stream, and runs the periodic and write-behind tasks around it.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::IntCounterVec;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::DomainCatalog;
use crate::classify::ClassifiedCounters;
use crate::config::{MonitorConfig, PersistenceConfig};
use crate::counters::CounterTable;
use crate::dispatch::Dispatcher;
use crate::error::{SentinelError, StoreError};
use crate::metrics::{names, MonitorMetrics};
use crate::mirror::{self, CounterMirror};
use crate::rank;
use crate::source::RecordSource;
use crate::store::CounterStore;
use crate::window::SourceWindow;

/// One fully wired monitor instance.
pub struct Monitor {
    config: MonitorConfig,
    metrics: MonitorMetrics,
    window: Arc<SourceWindow>,
    top_sources: Arc<CounterTable>,
    query_names: Arc<ClassifiedCounters>,
    tampered_sources: Arc<CounterTable>,
    mirror: Option<Arc<CounterMirror>>,
}

impl Monitor {
    /// Build the aggregation state over the given catalog and, when
    /// persistence is configured, the given store.
    pub fn new(
        config: MonitorConfig,
        catalog: Arc<dyn DomainCatalog>,
        store: Option<Arc<dyn CounterStore>>,
    ) -> Result<Self, SentinelError> {
        let metrics = MonitorMetrics::new()?;

        let window = Arc::new(SourceWindow::new(metrics.unique_sources.clone()));
        let top_sources = Arc::new(CounterTable::new(metrics.top_sources.clone()));
        let query_names = Arc::new(ClassifiedCounters::new(
            catalog,
            config.refresh,
            metrics.query_names.clone(),
        ));
        let tampered_sources = Arc::new(CounterTable::new(metrics.tampered_sources.clone()));

        let mirror = match (&config.persistence, store) {
            (PersistenceConfig::Mirrored(mirror_config), Some(store)) => {
                Some(Arc::new(CounterMirror::new(store, mirror_config)))
            }
            (PersistenceConfig::Mirrored(_), None) => {
                return Err(SentinelError::Config(
                    "mirrored persistence configured but no store was provided".to_string(),
                ));
            }
            (PersistenceConfig::None, _) => None,
        };

        Ok(Self {
            config,
            metrics,
            window,
            top_sources,
            query_names,
            tampered_sources,
            mirror,
        })
    }

    /// The metric families this monitor exports.
    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    /// Seed counters from the persistent mirror.
    ///
    /// Runs before any event is consumed, so counter metrics can be bumped
    /// from zero and set-by-value families seeded without racing updates.
    async fn restore(&self) -> Result<(), StoreError> {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };

        let queries = restore_volume(mirror, &self.metrics.queries, names::QUERIES).await?;
        let responses = restore_volume(mirror, &self.metrics.responses, names::RESPONSES).await?;

        let tampered = mirror.load_scalar(names::TAMPERED).await?;
        if tampered > 0.0 {
            self.metrics.tampered.inc_by(tampered as u64);
        }

        // A name that was reclassified mid-flight has one stored field per
        // classification it carried. Every series is republished, but the
        // in-memory count continues from the busiest one.
        let mut survivors: HashMap<String, u64> = HashMap::new();
        let mut restored_names = 0usize;
        for (labels, value) in mirror.load_fields(names::QUERY_NAMES).await? {
            let [name, classification] = labels.as_slice() else {
                warn!(?labels, "skipping stored query-name field with unexpected shape");
                continue;
            };
            let count = value as u64;
            self.metrics
                .query_names
                .with_label_values(&[name.as_str(), classification.as_str()])
                .set(count as i64);
            let entry = survivors.entry(name.clone()).or_insert(0);
            *entry = (*entry).max(count);
            restored_names += 1;
        }
        for (name, count) in survivors {
            self.query_names.seed_count(&name, count);
        }

        let mut restored_sources = 0usize;
        for (labels, value) in mirror.load_fields(names::TAMPERED_SOURCES).await? {
            let [source] = labels.as_slice() else {
                warn!(?labels, "skipping stored source field with unexpected shape");
                continue;
            };
            self.tampered_sources.seed(source, value as u64);
            restored_sources += 1;
        }

        info!(
            queries,
            responses,
            tampered,
            query_names = restored_names,
            tampered_sources = restored_sources,
            "restored counters from store"
        );
        Ok(())
    }

    /// Consume `source` until it ends or `shutdown` fires.
    ///
    /// Spawns the top-source publisher and, when persistence is configured,
    /// the write-behind worker; both are stopped and drained before this
    /// returns. A final ranking publication runs on the way out so even a
    /// short-lived run reports one.
    pub async fn run(
        self,
        mut source: Box<dyn RecordSource>,
        shutdown: CancellationToken,
    ) -> Result<(), SentinelError> {
        if let Err(error) = self.restore().await {
            warn!(%error, "counter restore failed, starting from zero");
        }

        let tasks = shutdown.child_token();

        let (mirror_handle, mirror_worker) = match (&self.mirror, &self.config.persistence) {
            (Some(mirror), PersistenceConfig::Mirrored(mirror_config)) => {
                let (handle, worker) = mirror::spawn_worker(
                    mirror.clone(),
                    mirror_config.queue_capacity,
                    tasks.clone(),
                );
                (Some(handle), Some(worker))
            }
            _ => (None, None),
        };

        let ranker = tokio::spawn(rank::run(
            self.top_sources.clone(),
            self.metrics.top_sources.clone(),
            self.config.top.size,
            self.config.top.interval(),
            tasks.clone(),
        ));

        let dispatcher = Dispatcher::new(
            self.metrics.clone(),
            self.window.clone(),
            self.top_sources.clone(),
            self.query_names.clone(),
            self.tampered_sources.clone(),
            self.config.sentinel_address.clone(),
            self.config.query_topic.clone(),
            self.config.response_topic.clone(),
            mirror_handle,
        );

        info!(
            sentinel = %self.config.sentinel_address,
            query_topic = %self.config.query_topic,
            response_topic = %self.config.response_topic,
            "monitor running"
        );

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping ingest");
                    break Ok(());
                }

                record = source.next() => match record {
                    Ok(Some(record)) => dispatcher.handle_record(&record).await,
                    Ok(None) => {
                        info!("activity stream ended");
                        break Ok(());
                    }
                    Err(error) => break Err(error),
                },
            }
        };

        tasks.cancel();
        if let Some(worker) = mirror_worker {
            let _ = worker.await;
        }
        let _ = ranker.await;

        // Publish whatever ranking the last partial interval accumulated.
        rank::publish_top(
            &self.top_sources,
            &self.metrics.top_sources,
            self.config.top.size,
        );

        info!("monitor stopped");
        outcome
    }
}

/// Restore one volume counter from its stored hash, one field per
/// `interval` label value. Returns the restored total.
async fn restore_volume(
    mirror: &CounterMirror,
    counter: &IntCounterVec,
    metric: &'static str,
) -> Result<f64, StoreError> {
    let mut total = 0.0;
    for (labels, value) in mirror.load_fields(metric).await? {
        let [interval] = labels.as_slice() else {
            warn!(?labels, metric, "skipping stored volume field with unexpected shape");
            continue;
        };
        counter
            .with_label_values(&[interval.as_str()])
            .inc_by(value as u64);
        total += value;
    }
    Ok(total)
}
