//! Error types for ScholarFlow services
//!
//! Provides a single error enum shared by both workers with:
//! - Distinct variants for each pipeline failure mode
//! - Machine-readable error codes grouped by family
//! - A transient/permanent split used for log severity

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidMessage,
    InvalidPositions,

    // Resource errors (4xxx)
    NotFound,
    ResearcherNotFound,
    PaperNotFound,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    ClassifierError,
    NotificationError,
    QueueError,
    BrokerUnavailable,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidMessage => 1002,
            ErrorCode::InvalidPositions => 1003,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::ResearcherNotFound => 4002,
            ErrorCode::PaperNotFound => 4003,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::ClassifierError => 8002,
            ErrorCode::NotificationError => 8003,
            ErrorCode::QueueError => 8004,
            ErrorCode::BrokerUnavailable => 8005,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid message on queue {queue}: {message}")]
    InvalidMessage { queue: String, message: String },

    #[error("Invalid positions: {message}")]
    InvalidPositions { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Researcher not found: {id}")]
    ResearcherNotFound { id: Uuid },

    #[error("Paper not found: {id}")]
    PaperNotFound { id: Uuid },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Classifier error: {message}")]
    ClassifierError { message: String },

    #[error("Notification error: {message}")]
    NotificationError { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Broker unavailable: {message}")]
    BrokerUnavailable { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidMessage { .. } => ErrorCode::InvalidMessage,
            AppError::InvalidPositions { .. } => ErrorCode::InvalidPositions,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::ResearcherNotFound { .. } => ErrorCode::ResearcherNotFound,
            AppError::PaperNotFound { .. } => ErrorCode::PaperNotFound,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::ClassifierError { .. } => ErrorCode::ClassifierError,
            AppError::NotificationError { .. } => ErrorCode::NotificationError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::BrokerUnavailable { .. } => ErrorCode::BrokerUnavailable,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the failure comes from infrastructure that may recover on its own.
    ///
    /// Pipeline stages still drop the message either way; this only drives
    /// the severity the drop is logged at.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::DatabaseConnection { .. }
                | AppError::QueueError { .. }
                | AppError::BrokerUnavailable { .. }
                | AppError::HttpClient(_)
                | AppError::ClassifierError { .. }
                | AppError::NotificationError { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|k| k.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}
