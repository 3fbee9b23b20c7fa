//! dns-sentinel - Real-time aggregation of DNS activity into Prometheus metrics.
//!
//! This crate consumes a resolver's query/response log stream and maintains
//! live counters over it: traffic volume, distinct client sources per minute,
//! and per-name and per-source tallies of responses whose answer set carries
//! a configured sentinel address. Queried names are classified through a
//! relational domain catalog, and counters can be mirrored into a key-value
//! store so they survive restarts.
//!
//! ## Features
//!
//! - Minute-bucketed deduplication of query sources
//! - Sentinel-answer detection with per-name and per-source attribution
//! - Domain classification with cached, refreshable catalog lookups
//! - Periodic top-source ranking
//! - Optional counter persistence with conditional writes and startup restore
//! - Graceful shutdown support
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         dns-sentinel                            │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │  Record Source   │───▶│    Dispatcher    │                  │
//! │  │ (NDJSON stream)  │    │ (query/response) │                  │
//! │  └──────────────────┘    └────────┬─────────┘                  │
//! │                                   │                             │
//! │         ┌─────────────┬───────────┼──────────────┐              │
//! │         ▼             ▼           ▼              ▼              │
//! │  ┌────────────┐ ┌──────────┐ ┌─────────┐ ┌────────────┐        │
//! │  │   Source   │ │ Top-N    │ │ Counter │ │ Classified │        │
//! │  │   Window   │ │ Ranker   │ │ Tables  │ │ Counters   │──▶ MySQL
//! │  └─────┬──────┘ └────┬─────┘ └────┬────┘ └─────┬──────┘        │
//! │        │             │            │            │               │
//! │        └─────────────┴─────┬──────┴────────────┘               │
//! │                            ▼                                   │
//! │                  ┌──────────────────┐      ┌───────────────┐   │
//! │                  │    Prometheus    │      │ Counter Mirror│──▶ Redis
//! │                  │     Registry     │      │ (write-behind)│   │
//! │                  └──────────────────┘      └───────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tamper Detection
//!
//! ```text
//! response {Answer: [.., 10.28.8.78, ..]}
//!   → tampered counter +1
//!   → classify query name via catalog (exact match, then registrable zone)
//!   → per-name hit count with classification label
//!   → per-source hit count
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use dns_sentinel::{Monitor, MonitorConfig, MySqlCatalog};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: MonitorConfig = todo!("load from file or environment");
//!
//!     let catalog = MySqlCatalog::connect(&config.catalog.url, config.catalog.lookup_timeout())
//!         .await
//!         .unwrap();
//!
//!     let monitor = Monitor::new(config.clone(), Arc::new(catalog), None).unwrap();
//!     let source = dns_sentinel::source::from_config(&config.source).await.unwrap();
//!
//!     let shutdown = CancellationToken::new();
//!     monitor.run(source, shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod catalog;
pub mod classify;
pub mod config;
pub mod counters;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod metrics;
pub mod mirror;
pub mod rank;
pub mod service;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod window;

// Re-export main types
pub use catalog::{DomainCatalog, MySqlCatalog};
pub use config::{Config, MonitorConfig, TelemetryConfig};
pub use error::{SentinelError, StoreError};
pub use metrics::MonitorMetrics;
pub use service::Monitor;
pub use store::{CounterStore, MemoryStore, RedisStore};
