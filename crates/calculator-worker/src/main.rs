//! ScholarFlow Calculator Worker
//!
//! Processes calculate requests from the calculations queue:
//! 1. Recomputes the researcher's metrics from stored papers
//! 2. Stamps the researcher's department on every paper
//! 3. Tags each paper through the classification service
//! 4. Notifies the owning admin

mod processor;

use crate::processor::CalculateProcessor;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use scholarflow_common::{
    classifier::create_classifier,
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository, ScholarStore},
    metrics::{histogram_buckets, register_metrics},
    notify::create_notifier,
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

    info!("Starting ScholarFlow Calculator Worker v{}", VERSION);

    if config.observability.metrics_port != 0 {
        install_exporter(&config.observability)?;
    }

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    db.ping().await?;
    let store: Arc<dyn ScholarStore> = Arc::new(Repository::new(db));

    let classifier = create_classifier(&config.classifier)?;
    let notifier = create_notifier(&config.notification)?;
    info!(
        classifier = %config.classifier.base_url,
        tag_concurrency = config.classifier.concurrency,
        "Classifier initialized"
    );

    let channel = queue::connect(&config.broker).await;
    if !channel.is_connected() {
        warn!("Message broker unavailable, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Calculator worker shutting down");
        return Ok(());
    }

    let processor = Arc::new(CalculateProcessor::new(
        store,
        classifier,
        notifier,
        config.classifier.concurrency,
    ));

    let queues = QueueNames::from(&config.broker);
    // Tagging a large profile can outlive the visibility timeout, keep extending it
    let visibility_secs = config.broker.visibility_timeout_secs;
    let options = ConsumerOptions {
        concurrency: config.worker.calculator_concurrency,
        max_consecutive_failures: config.worker.max_consecutive_failures,
        circuit_break: config.circuit_break(),
        heartbeat: Some(Duration::from_secs((visibility_secs / 3).max(1))),
        visibility_secs,
        ..Default::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = Consumer::new(channel.clone(), queues.calculate.clone(), options);
    let consumer = tokio::spawn(consumer.run(processor, shutdown_rx));

    info!(queue = %queues.calculate, "Calculator worker ready, consuming calculate requests...");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    consumer.await?;
    channel.close().await?;

    info!("Calculator worker shutting down");
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
