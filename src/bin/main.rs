//! dns-sentinel binary entry point.

use clap::Parser;
use dns_sentinel::store::CounterStore;
use dns_sentinel::{telemetry, Config, Monitor, MySqlCatalog, RedisStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dns_sentinel::config::PersistenceConfig;

/// DNS activity monitor with sentinel-answer detection.
#[derive(Parser, Debug)]
#[command(name = "dns-sentinel")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "dns-sentinel.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("DNS_SENTINEL")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        sentinel = %config.monitor.sentinel_address,
        catalog = %config.monitor.catalog.url,
        "Starting dns-sentinel"
    );

    let catalog = MySqlCatalog::connect(
        &config.monitor.catalog.url,
        config.monitor.catalog.lookup_timeout(),
    )
    .await?;

    let store: Option<Arc<dyn CounterStore>> = match &config.monitor.persistence {
        PersistenceConfig::Mirrored(mirror_config) => {
            let store = RedisStore::connect(&mirror_config.url).await?;
            Some(Arc::new(store))
        }
        PersistenceConfig::None => None,
    };

    let monitor = Monitor::new(config.monitor.clone(), Arc::new(catalog), store)?;

    // Expose the registry before events start flowing
    if let Some(addr) = config.telemetry.metrics_addr {
        telemetry::serve_metrics(addr, monitor.metrics().registry().clone())
            .map_err(|e| e as Box<dyn std::error::Error>)?;
    }

    let source = dns_sentinel::source::from_config(&config.monitor.source).await?;

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    // Run the monitor
    let result = monitor.run(source, shutdown).await;

    // Shutdown telemetry
    telemetry::shutdown();

    if let Err(e) = result {
        error!("Monitor error: {}", e);
        return Err(e.into());
    }

    info!("dns-sentinel shutdown complete");
    Ok(())
}
