//! ScholarFlow Scraper Worker
//!
//! Processes fetch requests from the researcher queue:
//! 1. Paginates the researcher's publication listing
//! 2. Fetches every publication detail page through the bounded pool
//! 3. Writes researcher metrics and paper records to the database
//! 4. Forwards the researcher to the calculations queue

mod errors;
mod parser;
mod pool;
mod processor;
mod source;

use crate::pool::FetchPool;
use crate::processor::ScrapeProcessor;
use crate::source::HttpScholarSource;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use scholarflow_common::{
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository, ScholarStore},
    metrics::{histogram_buckets, register_metrics},
    queue::{self, Consumer, ConsumerOptions, QueueNames},
    VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    init_tracing(&config.observability);

    info!("Starting ScholarFlow Scraper Worker v{}", VERSION);

    if config.observability.metrics_port != 0 {
        install_exporter(&config.observability)?;
    }

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    db.ping().await?;
    let store: Arc<dyn ScholarStore> = Arc::new(Repository::new(db));

    let channel = queue::connect(&config.broker).await;
    if !channel.is_connected() {
        warn!("Message broker unavailable, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Scraper worker shutting down");
        return Ok(());
    }

    let pool = FetchPool::new(&config.scraper)?;
    info!(
        pool_size = pool.capacity(),
        requests_per_second = config.scraper.requests_per_second,
        "Fetch pool initialized"
    );
    let source = Arc::new(HttpScholarSource::new(&config.scraper, pool)?);

    let queues = QueueNames::from(&config.broker);
    let processor = Arc::new(ScrapeProcessor::new(
        source,
        store,
        channel.clone(),
        queues.clone(),
        config.scraper.replace_existing_papers,
    ));

    // A fetch cycle can outlive the visibility timeout, keep extending it
    let visibility_secs = config.broker.visibility_timeout_secs;
    let options = ConsumerOptions {
        concurrency: config.worker.scraper_concurrency,
        max_consecutive_failures: config.worker.max_consecutive_failures,
        circuit_break: config.circuit_break(),
        heartbeat: Some(Duration::from_secs((visibility_secs / 3).max(1))),
        visibility_secs,
        ..Default::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = Consumer::new(channel.clone(), queues.fetch.clone(), options);
    let consumer = tokio::spawn(consumer.run(processor, shutdown_rx));

    info!(queue = %queues.fetch, "Scraper worker ready, consuming fetch requests...");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    consumer.await?;
    channel.close().await?;

    info!("Scraper worker shutting down");
    Ok(())
}

fn install_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone());
    for (name, buckets) in histogram_buckets() {
        builder = builder.set_buckets_for_metric(Matcher::Full(name), buckets)?;
    }
    builder.install()?;
    register_metrics();

    info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .with_target(true);

    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
