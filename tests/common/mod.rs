//! Shared test infrastructure for monitor integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use prometheus::proto::MetricType;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;

use dns_sentinel::catalog::DomainCatalog;
use dns_sentinel::config::{
    CatalogConfig, MirrorConfig, MonitorConfig, PersistenceConfig, TopConfig,
};
use dns_sentinel::source::{JsonLinesSource, RecordSource};
use dns_sentinel::store::CounterStore;
use dns_sentinel::{Monitor, SentinelError};

// --- Constants ---

pub const SENTINEL: &str = "10.28.8.78";
pub const QUERY_TOPIC: &str = "DNS_LOG_QUERY";
pub const RESPONSE_TOPIC: &str = "DNS_LOG";

// --- Catalog stub ---

/// Catalog with fixed answers per exact domain and per zone.
#[derive(Default)]
pub struct StaticCatalog {
    domains: HashMap<String, Vec<String>>,
    zones: HashMap<String, Vec<String>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `labels` for an exact-domain lookup of `domain`.
    pub fn with_domain(mut self, domain: &str, labels: &[&str]) -> Self {
        self.domains
            .insert(domain.to_string(), labels.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Answer `labels` for a zone lookup of `zone`.
    pub fn with_zone(mut self, zone: &str, labels: &[&str]) -> Self {
        self.zones
            .insert(zone.to_string(), labels.iter().map(|s| s.to_string()).collect());
        self
    }
}

#[async_trait]
impl DomainCatalog for StaticCatalog {
    async fn by_domain(&self, domain: &str) -> Result<Vec<String>, SentinelError> {
        Ok(self.domains.get(domain).cloned().unwrap_or_default())
    }

    async fn by_zone(&self, zone: &str) -> Result<Vec<String>, SentinelError> {
        Ok(self.zones.get(zone).cloned().unwrap_or_default())
    }
}

// --- Config builders ---

pub fn test_monitor_config() -> MonitorConfig {
    MonitorConfig {
        sentinel_address: SENTINEL.to_string(),
        query_topic: QUERY_TOPIC.to_string(),
        response_topic: RESPONSE_TOPIC.to_string(),
        refresh: Default::default(),
        // A huge ranking interval keeps the periodic publisher quiet; the
        // end-of-run publication is what these tests observe.
        top: TopConfig {
            size: 10,
            interval_secs: 3600,
        },
        catalog: CatalogConfig {
            url: "mysql://unused".to_string(),
            lookup_timeout_ms: 1000,
        },
        persistence: PersistenceConfig::None,
        source: Default::default(),
    }
}

pub fn test_mirror_config() -> MirrorConfig {
    MirrorConfig {
        url: "redis://unused".to_string(),
        namespace: "_metrics:".to_string(),
        max_retries: 5,
        retry_backoff_ms: 1,
        op_timeout_ms: 200,
        queue_capacity: 64,
    }
}

pub fn mirrored_config() -> MonitorConfig {
    MonitorConfig {
        persistence: PersistenceConfig::Mirrored(test_mirror_config()),
        ..test_monitor_config()
    }
}

// --- Monitor builder ---

pub fn build_monitor(
    config: MonitorConfig,
    catalog: StaticCatalog,
    store: Option<Arc<dyn CounterStore>>,
) -> Monitor {
    Monitor::new(config, Arc::new(catalog), store).expect("failed to create monitor")
}

// --- Stream construction ---

/// Envelope line for a query event.
pub fn query_line(source: &str, name: &str, at_secs: i64) -> String {
    format!(
        r#"{{"topic": "{QUERY_TOPIC}", "payload": {{"Timestamp": {at_secs}, "RemoteAddress": "{source}", "QueryName": "{name}"}}}}"#
    )
}

/// Envelope line for a response event.
pub fn response_line(source: &str, name: &str, answers: &[&str]) -> String {
    let count = answers.len();
    let answers = answers
        .iter()
        .map(|a| format!("\"{a}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{{"topic": "{RESPONSE_TOPIC}", "payload": {{"Timestamp": 1700000000, "RemoteAddress": "{source}", "QueryName": "{name}", "AnswerCount": {count}, "Answer": [{answers}]}}}}"#
    )
}

/// Wrap NDJSON lines in a record source.
pub fn lines_source(lines: String) -> Box<dyn RecordSource> {
    Box::new(JsonLinesSource::new(std::io::Cursor::new(lines)))
}

/// Run the monitor over `stream` until the stream ends.
pub async fn run_to_end(monitor: Monitor, stream: String) {
    monitor
        .run(lines_source(stream), CancellationToken::new())
        .await
        .expect("monitor run failed");
}

// --- Registry readers ---

/// Value of the series in family `name` matching every `(label, value)` pair.
pub fn metric_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> Option<i64> {
    let family = registry.gather().into_iter().find(|mf| mf.get_name() == name)?;
    let field_type = family.get_field_type();
    family
        .get_metric()
        .iter()
        .find(|m| {
            labels.iter().all(|(label, value)| {
                m.get_label()
                    .iter()
                    .any(|pair| pair.get_name() == *label && pair.get_value() == *value)
            })
        })
        .map(|m| match field_type {
            MetricType::COUNTER => m.get_counter().get_value() as i64,
            _ => m.get_gauge().get_value() as i64,
        })
}

/// All `(label value, gauge value)` pairs of a single-label family, sorted.
pub fn family_series(registry: &Registry, name: &str, label: &str) -> Vec<(String, i64)> {
    let Some(family) = registry.gather().into_iter().find(|mf| mf.get_name() == name) else {
        return Vec::new();
    };
    let mut series: Vec<(String, i64)> = family
        .get_metric()
        .iter()
        .filter_map(|m| {
            let pair = m.get_label().iter().find(|pair| pair.get_name() == label)?;
            Some((
                pair.get_value().to_string(),
                m.get_gauge().get_value() as i64,
            ))
        })
        .collect();
    series.sort();
    series
}
