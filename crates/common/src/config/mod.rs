//! Configuration management for ScholarFlow workers
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Message broker configuration (SQS)
    #[serde(default)]
    pub broker: BrokerConfig,

    /// External profile source and fetch pool
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Tag classification service
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Completion notifications
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Consumer loop tuning
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// AWS region of the queues
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint override (LocalStack, ElasticMQ)
    pub endpoint_url: Option<String>,

    /// Queue receiving one message per researcher to scrape
    #[serde(default = "default_fetch_queue")]
    pub fetch_queue: String,

    /// Queue receiving one message per researcher to enrich
    #[serde(default = "default_calculate_queue")]
    pub calculate_queue: String,

    /// Long polling timeout in seconds
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// How long to keep retrying the initial connection before degrading
    #[serde(default = "default_connect_budget")]
    pub connect_budget_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Listing endpoint of the profile source
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Origin that listing hrefs are resolved against
    #[serde(default = "default_source_origin")]
    pub source_origin: String,

    /// Interface language requested from the source
    #[serde(default = "default_language")]
    pub language: String,

    /// Listing page size
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Fetch pool capacity (global ceiling on concurrent page fetches)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Global politeness quota
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User agent sent to the source
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Purge a researcher's existing papers before inserting the new set
    #[serde(default = "default_enabled")]
    pub replace_existing_papers: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Base URL of the classification service (`POST {base_url}/predict`)
    #[serde(default = "default_classifier_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent classification calls per calculate cycle
    #[serde(default = "default_tag_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Endpoint of the API layer that relays events to admins.
    /// Notifications are only logged when unset.
    pub webhook_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_notification_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// In-flight researcher fetches (sequential gate)
    #[serde(default = "default_scraper_concurrency")]
    pub scraper_concurrency: usize,

    /// In-flight calculate cycles
    #[serde(default = "default_calculator_concurrency")]
    pub calculator_concurrency: usize,

    /// Receive failures tolerated before the consumer pauses
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    /// Pause duration once the failure threshold is reached
    #[serde(default = "default_circuit_break")]
    pub circuit_break_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or an EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_region() -> String { "us-east-1".to_string() }
fn default_fetch_queue() -> String { "researcher-queue".to_string() }
fn default_calculate_queue() -> String { "calculations-queue".to_string() }
fn default_wait_time() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_connect_budget() -> u64 { 30 }
fn default_listing_url() -> String { "https://scholar.google.co.in/citations".to_string() }
fn default_source_origin() -> String { "https://scholar.google.com".to_string() }
fn default_language() -> String { "en".to_string() }
fn default_page_size() -> usize { 100 }
fn default_pool_size() -> usize { 50 }
fn default_requests_per_second() -> u32 { 20 }
fn default_request_timeout() -> u64 { 30 }
fn default_user_agent() -> String { "Mozilla/5.0 (compatible; ScholarFlow/1.0)".to_string() }
fn default_enabled() -> bool { true }
fn default_classifier_url() -> String { "http://localhost:5000".to_string() }
fn default_classifier_timeout() -> u64 { 30 }
fn default_tag_concurrency() -> usize { 8 }
fn default_notification_timeout() -> u64 { 10 }
fn default_scraper_concurrency() -> usize { 1 }
fn default_calculator_concurrency() -> usize { 1 }
fn default_max_failures() -> u32 { 5 }
fn default_circuit_break() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "scholarflow".to_string() }

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            fetch_queue: default_fetch_queue(),
            calculate_queue: default_calculate_queue(),
            wait_time_secs: default_wait_time(),
            visibility_timeout_secs: default_visibility_timeout(),
            connect_budget_secs: default_connect_budget(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            source_origin: default_source_origin(),
            language: default_language(),
            page_size: default_page_size(),
            pool_size: default_pool_size(),
            requests_per_second: default_requests_per_second(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            replace_existing_papers: default_enabled(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_classifier_url(),
            timeout_secs: default_classifier_timeout(),
            concurrency: default_tag_concurrency(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notification_timeout(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scraper_concurrency: default_scraper_concurrency(),
            calculator_concurrency: default_calculator_concurrency(),
            max_consecutive_failures: default_max_failures(),
            circuit_break_secs: default_circuit_break(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SCRAPER__POOL_SIZE=20
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Pause applied by the consumer's circuit breaker
    pub fn circuit_break(&self) -> Duration {
        Duration::from_secs(self.worker.circuit_break_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/scholarflow".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            broker: BrokerConfig::default(),
            scraper: ScraperConfig::default(),
            classifier: ClassifierConfig::default(),
            notification: NotificationConfig::default(),
            worker: WorkerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
