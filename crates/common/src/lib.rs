//! ScholarFlow Common Library
//!
//! Shared code for the ingestion pipeline workers including:
//! - Message contracts and the durable message channel
//! - Researcher/paper domain types and citation metrics
//! - Database models and the persistence contract
//! - Classifier and notification clients
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod citation;
pub mod classifier;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod scholar;

// Re-export commonly used types
pub use citation::CitationMetrics;
pub use config::AppConfig;
pub use db::{Repository, ScholarStore};
pub use errors::{AppError, Result};
pub use scholar::{Paper, Researcher};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
