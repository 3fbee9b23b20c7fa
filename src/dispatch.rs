//! Routes decoded stream records into the aggregation state.
//!
//! Queries feed the volume counters, the unique-source window and the
//! ranking input. Responses feed the volume counters and, when the answer
//! set contains the sentinel address, the tamper counters.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classify::ClassifiedCounters;
use crate::counters::CounterTable;
use crate::event::{DnsEvent, EventCategory};
use crate::metrics::{names, MonitorMetrics, INTERVAL_MINUTE};
use crate::mirror::{MirrorHandle, SyncOp};
use crate::source::SourceRecord;
use crate::window::SourceWindow;

/// Per-event routing over the monitor's shared state.
pub struct Dispatcher {
    metrics: MonitorMetrics,
    window: Arc<SourceWindow>,
    top_sources: Arc<CounterTable>,
    query_names: Arc<ClassifiedCounters>,
    tampered_sources: Arc<CounterTable>,
    sentinel_address: String,
    query_topic: String,
    response_topic: String,
    mirror: Option<MirrorHandle>,
}

impl Dispatcher {
    /// Wire a dispatcher over the monitor's state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metrics: MonitorMetrics,
        window: Arc<SourceWindow>,
        top_sources: Arc<CounterTable>,
        query_names: Arc<ClassifiedCounters>,
        tampered_sources: Arc<CounterTable>,
        sentinel_address: String,
        query_topic: String,
        response_topic: String,
        mirror: Option<MirrorHandle>,
    ) -> Self {
        Self {
            metrics,
            window,
            top_sources,
            query_names,
            tampered_sources,
            sentinel_address,
            query_topic,
            response_topic,
            mirror,
        }
    }

    fn category_for(&self, topic: &str) -> Option<EventCategory> {
        if topic == self.query_topic {
            Some(EventCategory::Query)
        } else if topic == self.response_topic {
            Some(EventCategory::Response)
        } else {
            None
        }
    }

    fn sync(&self, op: SyncOp) {
        if let Some(mirror) = &self.mirror {
            mirror.enqueue(op);
        }
    }

    /// Decode and route one record. Records on other topics and payloads
    /// that fail to decode are dropped; the stream keeps flowing.
    pub async fn handle_record(&self, record: &SourceRecord) {
        let Some(category) = self.category_for(&record.topic) else {
            debug!(topic = %record.topic, "ignoring record on unmonitored topic");
            return;
        };

        let event = match DnsEvent::decode(&record.payload) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, topic = %record.topic, "dropping undecodable event");
                return;
            }
        };

        match category {
            EventCategory::Query => self.handle_query(&event),
            EventCategory::Response => self.handle_response(&event).await,
        }
    }

    /// A query: volume, unique-source window, ranking input.
    pub fn handle_query(&self, event: &DnsEvent) {
        self.metrics
            .queries
            .with_label_values(&[INTERVAL_MINUTE])
            .inc();
        self.sync(SyncOp::Field {
            metric: names::QUERIES,
            labels: vec![INTERVAL_MINUTE.to_string()],
            delta: 1.0,
        });

        self.window.record(&event.remote_address, event.timestamp);
        self.top_sources.increment(&event.remote_address);
    }

    /// A response: volume, then the tamper counters when the answer set
    /// carries the sentinel address.
    pub async fn handle_response(&self, event: &DnsEvent) {
        self.metrics
            .responses
            .with_label_values(&[INTERVAL_MINUTE])
            .inc();
        self.sync(SyncOp::Field {
            metric: names::RESPONSES,
            labels: vec![INTERVAL_MINUTE.to_string()],
            delta: 1.0,
        });

        if !event.has_answer(&self.sentinel_address) {
            return;
        }

        self.metrics.tampered.inc();
        self.sync(SyncOp::Scalar {
            metric: names::TAMPERED,
            delta: 1.0,
        });

        let hit = self.query_names.record(&event.query_name).await;
        self.sync(SyncOp::Field {
            metric: names::QUERY_NAMES,
            labels: vec![event.query_name.clone(), hit.classification.clone()],
            delta: 1.0,
        });

        self.tampered_sources.increment(&event.remote_address);
        self.sync(SyncOp::Field {
            metric: names::TAMPERED_SOURCES,
            labels: vec![event.remote_address.clone()],
            delta: 1.0,
        });

        info!(
            source = %event.remote_address,
            query_name = %event.query_name,
            classification = %hit.classification,
            hits = hit.count,
            "sentinel answer observed in response"
        );
    }
}
