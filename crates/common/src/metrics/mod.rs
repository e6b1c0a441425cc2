//! Metrics and observability utilities
//!
//! Prometheus metrics for both pipeline stages with standardized naming
//! conventions. Recording is a no-op until an exporter is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ScholarFlow metrics
pub const METRICS_PREFIX: &str = "scholarflow";

/// Buckets for external page fetches and classifier calls (in seconds)
pub const FETCH_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s - request timeout
];

/// Buckets for whole fetch and calculate cycles
pub const CYCLE_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];

/// Bucket layout for every histogram, keyed by full metric name
pub fn histogram_buckets() -> Vec<(String, &'static [f64])> {
    vec![
        (format!("{}_detail_fetch_duration_seconds", METRICS_PREFIX), FETCH_BUCKETS),
        (format!("{}_classification_duration_seconds", METRICS_PREFIX), FETCH_BUCKETS),
        (format!("{}_cycle_duration_seconds", METRICS_PREFIX), CYCLE_BUCKETS),
    ]
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Queue metrics
    describe_counter!(
        format!("{}_deliveries_settled_total", METRICS_PREFIX),
        Unit::Count,
        "Deliveries settled, by queue, action and outcome"
    );

    describe_counter!(
        format!("{}_circuit_open_total", METRICS_PREFIX),
        Unit::Count,
        "Times a consumer paused after consecutive failures"
    );

    // Scraper metrics
    describe_counter!(
        format!("{}_listing_pages_total", METRICS_PREFIX),
        Unit::Count,
        "Listing pages requested"
    );

    describe_counter!(
        format!("{}_detail_fetches_total", METRICS_PREFIX),
        Unit::Count,
        "Publication detail pages fetched, by status"
    );

    describe_histogram!(
        format!("{}_detail_fetch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Publication detail page latency in seconds"
    );

    describe_counter!(
        format!("{}_papers_persisted_total", METRICS_PREFIX),
        Unit::Count,
        "Paper records written by fetch cycles"
    );

    // Cycle metrics
    describe_counter!(
        format!("{}_cycles_total", METRICS_PREFIX),
        Unit::Count,
        "Fetch and calculate cycles, by stage and status"
    );

    describe_histogram!(
        format!("{}_cycle_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Cycle latency in seconds"
    );

    // Enrichment metrics
    describe_counter!(
        format!("{}_classifications_total", METRICS_PREFIX),
        Unit::Count,
        "Classifier calls, by status"
    );

    describe_histogram!(
        format!("{}_classification_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Classifier latency in seconds"
    );

    describe_counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        Unit::Count,
        "Notification dispatch attempts, by status"
    );

    tracing::info!("Metrics registered");
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Helper to time one fetch or calculate cycle
pub struct CycleMetrics {
    start: Instant,
    stage: &'static str,
}

impl CycleMetrics {
    /// Start tracking a cycle for `stage` ("fetch" or "calculate")
    pub fn start(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    /// Record cycle completion
    pub fn finish(self, success: bool) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_cycles_total", METRICS_PREFIX),
            "stage" => self.stage,
            "status" => status(success)
        )
        .increment(1);

        histogram!(
            format!("{}_cycle_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(duration);
    }
}

/// Record an ack or nack against a queue
pub fn record_settlement(queue: &str, action: &'static str, success: bool) {
    counter!(
        format!("{}_deliveries_settled_total", METRICS_PREFIX),
        "queue" => queue.to_string(),
        "action" => action,
        "status" => status(success)
    )
    .increment(1);
}

pub fn record_circuit_open(queue: &str) {
    counter!(
        format!("{}_circuit_open_total", METRICS_PREFIX),
        "queue" => queue.to_string()
    )
    .increment(1);
}

pub fn record_listing_page(links: usize) {
    counter!(
        format!("{}_listing_pages_total", METRICS_PREFIX),
        "empty" => if links == 0 { "true" } else { "false" }
    )
    .increment(1);
}

/// Helper to record detail page metrics
pub fn record_detail_fetch(duration_secs: f64, success: bool) {
    counter!(
        format!("{}_detail_fetches_total", METRICS_PREFIX),
        "status" => status(success)
    )
    .increment(1);

    if success {
        histogram!(format!("{}_detail_fetch_duration_seconds", METRICS_PREFIX)).record(duration_secs);
    }
}

pub fn record_papers_persisted(count: usize) {
    counter!(format!("{}_papers_persisted_total", METRICS_PREFIX)).increment(count as u64);
}

/// Helper to record classifier metrics
pub fn record_classification(duration_secs: f64, success: bool) {
    counter!(
        format!("{}_classifications_total", METRICS_PREFIX),
        "status" => status(success)
    )
    .increment(1);

    histogram!(format!("{}_classification_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

pub fn record_notification(success: bool) {
    counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        "status" => status(success)
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [FETCH_BUCKETS, CYCLE_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }

        // Request timeout should be in buckets
        assert!(FETCH_BUCKETS.contains(&30.0));
    }

    #[test]
    fn test_every_histogram_has_buckets() {
        let layout = histogram_buckets();
        assert_eq!(layout.len(), 3);
        assert!(layout.iter().all(|(name, _)| name.starts_with("scholarflow_")));
        assert!(layout
            .iter()
            .any(|(name, buckets)| name == "scholarflow_cycle_duration_seconds" && *buckets == CYCLE_BUCKETS));
    }

    #[test]
    fn test_cycle_metrics() {
        let metrics = CycleMetrics::start("fetch");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(true);
        // Just verify it runs without a recorder installed
        record_settlement("researcher-queue", "ack", true);
    }
}
