//! Query-name classification lookups.
//!
//! The monitor asks an external relational catalog which "main domains" a
//! query name belongs to. Lookups go through [`DomainCatalog`] so the engine
//! never depends on a concrete backend; [`MySqlCatalog`] is the production
//! implementation, querying the resolver's control database.

use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::SentinelError;

/// Maps query names to their owning main domains.
#[async_trait]
pub trait DomainCatalog: Send + Sync {
    /// Labels attached to an exact query name.
    async fn by_domain(&self, name: &str) -> Result<Vec<String>, SentinelError>;

    /// Labels attached to a registrable zone. Consulted only when the exact
    /// lookup comes back empty.
    async fn by_zone(&self, zone: &str) -> Result<Vec<String>, SentinelError>;
}

/// Derive the registrable zone for a name: the last two dot-separated
/// labels, with a trailing dot.
///
/// Returns `None` for names with fewer than two labels, which skips the
/// zone lookup entirely.
pub fn registrable_zone(name: &str) -> Option<String> {
    let labels: Vec<&str> = name.trim_matches('.').split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    Some(format!("{}.", labels[labels.len() - 2..].join(".")))
}

/// Full classification lookup: exact name first, registrable zone as the
/// fallback when the exact match is empty.
pub async fn lookup_labels(
    catalog: &dyn DomainCatalog,
    name: &str,
) -> Result<Vec<String>, SentinelError> {
    let labels = catalog.by_domain(name).await?;
    if !labels.is_empty() {
        return Ok(labels);
    }
    match registrable_zone(name) {
        Some(zone) => catalog.by_zone(&zone).await,
        None => Ok(labels),
    }
}

/// Catalog backed by the resolver's MySQL control database.
pub struct MySqlCatalog {
    pool: MySqlPool,
    lookup_timeout: Duration,
}

impl MySqlCatalog {
    /// Connect to the catalog database.
    pub async fn connect(url: &str, lookup_timeout: Duration) -> Result<Self, SentinelError> {
        let pool = MySqlPool::connect(url).await?;
        Ok(Self {
            pool,
            lookup_timeout,
        })
    }

    async fn query_labels(
        &self,
        sql: &'static str,
        key: &str,
    ) -> Result<Vec<String>, SentinelError> {
        let rows = timeout(
            self.lookup_timeout,
            sqlx::query_scalar::<_, String>(sql)
                .bind(key)
                .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| SentinelError::CatalogTimeout)??;
        Ok(rows)
    }
}

#[async_trait]
impl DomainCatalog for MySqlCatalog {
    async fn by_domain(&self, name: &str) -> Result<Vec<String>, SentinelError> {
        self.query_labels(
            "SELECT main_domain FROM coredns_records WHERE domain = ?",
            name,
        )
        .await
    }

    async fn by_zone(&self, zone: &str) -> Result<Vec<String>, SentinelError> {
        self.query_labels(
            "SELECT main_domain FROM coredns_records WHERE zone = ?",
            zone,
        )
        .await
    }
}
