//! Metric families exported by dns-sentinel.
//!
//! All families are prefixed with `dns_sentinel_` and registered against an
//! explicit [`prometheus::Registry`] owned by [`MonitorMetrics`]. Handles are
//! handed to the component that drives them; nothing goes through globals.

use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::SentinelError;

/// Label value used on the volume counters.
pub const INTERVAL_MINUTE: &str = "minute";

/// Family names. The persistence layer reuses them as store keys.
pub mod names {
    /// Query volume counter.
    pub const QUERIES: &str = "dns_sentinel_queries_total";
    /// Response volume counter.
    pub const RESPONSES: &str = "dns_sentinel_responses_total";
    /// Unique-source gauge.
    pub const UNIQUE_SOURCES: &str = "dns_sentinel_unique_sources";
    /// Tampered-response counter.
    pub const TAMPERED: &str = "dns_sentinel_tampered_responses_total";
    /// Per-name tampered hit family.
    pub const QUERY_NAMES: &str = "dns_sentinel_query_name_hits";
    /// Per-source tampered hit family.
    pub const TAMPERED_SOURCES: &str = "dns_sentinel_tampered_source_hits";
    /// Top query source family.
    pub const TOP_SOURCES: &str = "dns_sentinel_top_sources";
}

/// All metric families owned by one monitor instance.
#[derive(Clone)]
pub struct MonitorMetrics {
    registry: Registry,

    /// Queries observed, by aggregation interval.
    pub queries: IntCounterVec,

    /// Responses observed, by aggregation interval.
    pub responses: IntCounterVec,

    /// Distinct query sources in the current minute bucket.
    pub unique_sources: IntGauge,

    /// Responses whose answer set contained the sentinel address.
    pub tampered: IntCounter,

    /// Per-name hit totals for tampered responses.
    ///
    /// The `classification` label is recomputed when the cache refreshes, so
    /// a name whose classification changes leaves its old series behind at
    /// its last value.
    pub query_names: IntGaugeVec,

    /// Per-source hit totals for tampered responses.
    pub tampered_sources: IntGaugeVec,

    /// Query volume of the busiest sources, republished each ranking tick.
    pub top_sources: IntGaugeVec,
}

impl MonitorMetrics {
    /// Construct every family and register it against a fresh registry.
    pub fn new() -> Result<Self, SentinelError> {
        let registry = Registry::new();

        let queries = IntCounterVec::new(
            Opts::new(names::QUERIES, "DNS queries observed"),
            &["interval"],
        )?;
        let responses = IntCounterVec::new(
            Opts::new(names::RESPONSES, "DNS responses observed"),
            &["interval"],
        )?;
        let unique_sources = IntGauge::new(
            names::UNIQUE_SOURCES,
            "Distinct query sources in the current minute",
        )?;
        let tampered = IntCounter::new(
            names::TAMPERED,
            "Responses carrying the sentinel answer address",
        )?;
        let query_names = IntGaugeVec::new(
            Opts::new(names::QUERY_NAMES, "Tampered-response hits per query name"),
            &["query_name", "classification"],
        )?;
        let tampered_sources = IntGaugeVec::new(
            Opts::new(
                names::TAMPERED_SOURCES,
                "Tampered-response hits per source address",
            ),
            &["source_address"],
        )?;
        let top_sources = IntGaugeVec::new(
            Opts::new(
                names::TOP_SOURCES,
                "Query volume of the highest-traffic sources",
            ),
            &["source_address"],
        )?;

        registry.register(Box::new(queries.clone()))?;
        registry.register(Box::new(responses.clone()))?;
        registry.register(Box::new(unique_sources.clone()))?;
        registry.register(Box::new(tampered.clone()))?;
        registry.register(Box::new(query_names.clone()))?;
        registry.register(Box::new(tampered_sources.clone()))?;
        registry.register(Box::new(top_sources.clone()))?;

        Ok(Self {
            registry,
            queries,
            responses,
            unique_sources,
            tampered,
            query_names,
            tampered_sources,
            top_sources,
        })
    }

    /// The registry every family is registered against.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, SentinelError> {
        let mut out = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut out)?;
        Ok(out)
    }
}
