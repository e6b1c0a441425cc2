//! Scraper worker error types

use scholarflow_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Listing fetch failed for {scholar_id} at offset {offset}: {message}")]
    Listing {
        scholar_id: String,
        offset: usize,
        message: String,
    },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("None of the {links} publications of {scholar_id} could be fetched")]
    NoPublications { scholar_id: String, links: usize },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Fetch pool is closed")]
    PoolClosed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Pipeline(#[from] AppError),
}

impl ScrapeError {
    /// Whether the profile source or the infrastructure may recover on its own
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Listing { .. }
            | ScrapeError::Status { .. }
            | ScrapeError::NoPublications { .. }
            | ScrapeError::Http(_) => true,
            ScrapeError::Pipeline(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<url::ParseError> for ScrapeError {
    fn from(e: url::ParseError) -> Self {
        ScrapeError::InvalidUrl(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_failures_are_transient() {
        let err = ScrapeError::Status {
            url: "https://scholar.example/citations".to_string(),
            status: 429,
        };
        assert!(err.is_transient());

        let err = ScrapeError::NoPublications {
            scholar_id: "qc6CJjYAAAAJ".to_string(),
            links: 3,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_and_store_failures_are_not_transient() {
        let err = ScrapeError::Parse {
            url: "https://scholar.example/citations".to_string(),
            message: "listing page has no publication table".to_string(),
        };
        assert!(!err.is_transient());

        let err: ScrapeError = AppError::Internal {
            message: "insert rejected".to_string(),
        }
        .into();
        assert!(!err.is_transient());

        let err: ScrapeError = AppError::DatabaseConnection {
            message: "connection reset".to_string(),
        }
        .into();
        assert!(err.is_transient());
    }
}
