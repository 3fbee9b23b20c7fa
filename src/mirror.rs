//! Write-behind persistence of counters.
//!
//! Increments are queued as [`SyncOp`]s and applied by a worker task that
//! owns the store round-trips, so ingestion never stalls on the backend.
//! Each application is an optimistic read-modify-conditional-write with a
//! bounded retry budget; an exhausted budget drops that increment and the
//! in-memory counters stay authoritative.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::error::StoreError;
use crate::store::CounterStore;

/// Separator between label values in a persisted hash field.
pub const FIELD_SEPARATOR: &str = "|";

/// One queued persistence operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOp {
    /// Add `delta` to a scalar counter.
    Scalar {
        /// Counter name, without the namespace prefix.
        metric: &'static str,
        /// Amount to add.
        delta: f64,
    },
    /// Add `delta` to one field of a hash counter.
    Field {
        /// Counter name, without the namespace prefix.
        metric: &'static str,
        /// Label values identifying the field.
        labels: Vec<String>,
        /// Amount to add.
        delta: f64,
    },
}

/// Mirrors counter increments into a [`CounterStore`] and restores them at
/// startup.
pub struct CounterMirror {
    store: Arc<dyn CounterStore>,
    namespace: String,
    max_retries: u32,
    retry_backoff: Duration,
    op_timeout: Duration,
}

impl CounterMirror {
    /// Create a mirror over `store`.
    pub fn new(store: Arc<dyn CounterStore>, config: &MirrorConfig) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            op_timeout: config.op_timeout(),
        }
    }

    fn key(&self, metric: &str) -> String {
        format!("{}{}", self.namespace, metric)
    }

    /// Add `delta` to the persisted scalar `metric` and return the value
    /// written.
    ///
    /// Runs a bounded read-modify-conditional-write loop: a lost write is
    /// retried after a fixed backoff, and once the budget is spent the
    /// increment is dropped with [`StoreError::Conflict`].
    pub async fn sync_scalar(&self, metric: &str, delta: f64) -> Result<f64, StoreError> {
        let key = self.key(metric);
        for attempt in 1..=self.max_retries {
            let current = self.bounded(self.store.get(&key)).await?;
            let next = current.unwrap_or(0.0) + delta;
            if self.bounded(self.store.put_if(&key, current, next)).await? {
                return Ok(next);
            }
            if attempt < self.max_retries {
                debug!(key = %key, attempt, "conditional write lost, retrying");
                sleep(self.retry_backoff).await;
            }
        }
        Err(StoreError::Conflict {
            attempts: self.max_retries,
        })
    }

    /// Add `delta` to the field identified by `labels` of the persisted
    /// hash `metric` and return the value written.
    pub async fn sync_field(
        &self,
        metric: &str,
        labels: &[String],
        delta: f64,
    ) -> Result<f64, StoreError> {
        let key = self.key(metric);
        let field = labels.join(FIELD_SEPARATOR);
        for attempt in 1..=self.max_retries {
            let current = self.bounded(self.store.field_get(&key, &field)).await?;
            let next = current.unwrap_or(0.0) + delta;
            if self
                .bounded(self.store.field_put_if(&key, &field, current, next))
                .await?
            {
                return Ok(next);
            }
            if attempt < self.max_retries {
                debug!(key = %key, field = %field, attempt, "conditional write lost, retrying");
                sleep(self.retry_backoff).await;
            }
        }
        Err(StoreError::Conflict {
            attempts: self.max_retries,
        })
    }

    /// Read the persisted scalar `metric`, zero when absent.
    pub async fn load_scalar(&self, metric: &str) -> Result<f64, StoreError> {
        let key = self.key(metric);
        Ok(self.bounded(self.store.get(&key)).await?.unwrap_or(0.0))
    }

    /// Read every `(label values, count)` pair of the persisted hash
    /// `metric`.
    pub async fn load_fields(&self, metric: &str) -> Result<Vec<(Vec<String>, f64)>, StoreError> {
        let key = self.key(metric);
        let fields = self.bounded(self.store.fields(&key)).await?;
        Ok(fields
            .into_iter()
            .map(|(field, value)| {
                let labels = field.split(FIELD_SEPARATOR).map(str::to_string).collect();
                (labels, value)
            })
            .collect())
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

/// Handle used by the dispatcher to enqueue persistence work.
#[derive(Clone)]
pub struct MirrorHandle {
    tx: mpsc::Sender<SyncOp>,
}

impl MirrorHandle {
    /// Queue an operation without blocking. A full queue drops the
    /// operation; the in-memory counters already carry it.
    pub fn enqueue(&self, op: SyncOp) {
        if let Err(e) = self.tx.try_send(op) {
            warn!(error = %e, "persistence queue full, dropping counter sync");
        }
    }
}

/// Spawn the write-behind worker.
///
/// Returns the queue handle and the worker's join handle. After `shutdown`
/// fires the worker drains whatever is still queued before stopping.
pub fn spawn_worker(
    mirror: Arc<CounterMirror>,
    queue_capacity: usize,
    shutdown: CancellationToken,
) -> (MirrorHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_capacity);
    let worker = tokio::spawn(worker_loop(mirror, rx, shutdown));
    (MirrorHandle { tx }, worker)
}

async fn worker_loop(
    mirror: Arc<CounterMirror>,
    mut rx: mpsc::Receiver<SyncOp>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                rx.close();
                while let Some(op) = rx.recv().await {
                    apply(&mirror, op).await;
                }
                info!("persistence worker drained and stopped");
                return;
            }

            op = rx.recv() => {
                match op {
                    Some(op) => apply(&mirror, op).await,
                    None => {
                        info!("persistence queue closed, worker stopping");
                        return;
                    }
                }
            }
        }
    }
}

async fn apply(mirror: &CounterMirror, op: SyncOp) {
    let result = match &op {
        SyncOp::Scalar { metric, delta } => mirror.sync_scalar(metric, *delta).await.map(|_| ()),
        SyncOp::Field {
            metric,
            labels,
            delta,
        } => mirror.sync_field(metric, labels, *delta).await.map(|_| ()),
    };
    if let Err(e) = result {
        warn!(op = ?op, error = %e, "counter sync dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn test_config() -> MirrorConfig {
        MirrorConfig {
            url: String::new(),
            namespace: "_metrics:".to_string(),
            max_retries: 3,
            retry_backoff_ms: 1,
            op_timeout_ms: 200,
            queue_capacity: 16,
        }
    }

    fn make_mirror(store: Arc<dyn CounterStore>) -> CounterMirror {
        CounterMirror::new(store, &test_config())
    }

    #[tokio::test]
    async fn test_scalar_sync_accumulates_under_namespace() {
        let store = Arc::new(MemoryStore::new());
        let mirror = make_mirror(store.clone());

        for _ in 0..5 {
            mirror.sync_scalar("hits", 1.0).await.unwrap();
        }

        assert_eq!(store.get("_metrics:hits").await.unwrap(), Some(5.0));
        assert_eq!(mirror.load_scalar("hits").await.unwrap(), 5.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_contending_writers_lose_no_increments() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        // Every lost write means the other writer landed one, and each
        // writer lands 50 in total, so this many attempts can never run out.
        let mut config = test_config();
        config.max_retries = 64;

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let mirror = CounterMirror::new(store.clone(), &config);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        mirror.sync_scalar("hits", 1.0).await.unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let mirror = CounterMirror::new(store, &config);
        assert_eq!(mirror.load_scalar("hits").await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_field_sync_joins_labels() {
        let store = Arc::new(MemoryStore::new());
        let mirror = make_mirror(store.clone());

        let labels = vec!["a.example.com".to_string(), "cdn,shield".to_string()];
        mirror.sync_field("names", &labels, 1.0).await.unwrap();
        mirror.sync_field("names", &labels, 1.0).await.unwrap();

        assert_eq!(
            store
                .field_get("_metrics:names", "a.example.com|cdn,shield")
                .await
                .unwrap(),
            Some(2.0)
        );

        let restored = mirror.load_fields("names").await.unwrap();
        assert_eq!(restored, vec![(labels, 2.0)]);
    }

    #[tokio::test]
    async fn test_load_missing_counters_is_zero() {
        let mirror = make_mirror(Arc::new(MemoryStore::new()));
        assert_eq!(mirror.load_scalar("absent").await.unwrap(), 0.0);
        assert!(mirror.load_fields("absent").await.unwrap().is_empty());
    }

    /// Store whose conditional writes always lose.
    struct ContestedStore;

    #[async_trait]
    impl CounterStore for ContestedStore {
        async fn get(&self, _key: &str) -> Result<Option<f64>, StoreError> {
            Ok(Some(1.0))
        }

        async fn put_if(
            &self,
            _key: &str,
            _expected: Option<f64>,
            _value: f64,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn field_get(&self, _key: &str, _field: &str) -> Result<Option<f64>, StoreError> {
            Ok(Some(1.0))
        }

        async fn field_put_if(
            &self,
            _key: &str,
            _field: &str,
            _expected: Option<f64>,
            _value: f64,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn fields(&self, _key: &str) -> Result<Vec<(String, f64)>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_surfaces_conflict() {
        let mirror = make_mirror(Arc::new(ContestedStore));

        let err = mirror.sync_scalar("hits", 1.0).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { attempts: 3 }));

        let err = mirror
            .sync_field("names", &["a".to_string()], 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_skips_the_final_backoff() {
        let mirror = make_mirror(Arc::new(ContestedStore));
        let start = tokio::time::Instant::now();

        let err = mirror.sync_scalar("hits", 1.0).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict { attempts: 3 }));
        // Three attempts separated by two backoffs; none after the last.
        assert_eq!(start.elapsed(), Duration::from_millis(2));
    }

    /// Store whose reads never resolve.
    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<f64>, StoreError> {
            std::future::pending().await
        }

        async fn put_if(
            &self,
            _key: &str,
            _expected: Option<f64>,
            _value: f64,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn field_get(&self, _key: &str, _field: &str) -> Result<Option<f64>, StoreError> {
            Ok(None)
        }

        async fn field_put_if(
            &self,
            _key: &str,
            _field: &str,
            _expected: Option<f64>,
            _value: f64,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn fields(&self, _key: &str) -> Result<Vec<(String, f64)>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let store = Arc::new(StalledStore);
        let mut config = test_config();
        config.op_timeout_ms = 10;
        let mirror = CounterMirror::new(store, &config);

        let err = mirror.sync_scalar("hits", 1.0).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout));
    }

    #[tokio::test]
    async fn test_worker_drains_queue_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let mirror = Arc::new(make_mirror(store.clone()));
        let shutdown = CancellationToken::new();
        let (handle, worker) = spawn_worker(mirror, 16, shutdown.clone());

        for _ in 0..4 {
            handle.enqueue(SyncOp::Scalar {
                metric: "hits",
                delta: 1.0,
            });
        }
        shutdown.cancel();
        worker.await.unwrap();

        assert_eq!(store.get("_metrics:hits").await.unwrap(), Some(4.0));
    }
}
