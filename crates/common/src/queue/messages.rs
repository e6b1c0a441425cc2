//! Pipeline message contracts
//!
//! Wire shapes are fixed by the API layer that publishes fetch requests:
//!
//! ```json
//! {"admin_id": "...", "researcher": {"researcher_id": "...", "name": "...", "scholar_id": "..."}}
//! {"researcher_id": "..."}
//! ```
//!
//! Payloads are parsed into typed variants and validated before any worker
//! logic sees them.

use crate::errors::{AppError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// The two logical queues of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Fetch,
    Calculate,
}

/// Queue names resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub fetch: String,
    pub calculate: String,
}

impl QueueNames {
    pub fn new(fetch: impl Into<String>, calculate: impl Into<String>) -> Self {
        Self {
            fetch: fetch.into(),
            calculate: calculate.into(),
        }
    }

    pub fn for_kind(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::Fetch => &self.fetch,
            MessageKind::Calculate => &self.calculate,
        }
    }

    pub fn all(&self) -> [&str; 2] {
        [&self.fetch, &self.calculate]
    }
}

impl From<&crate::config::BrokerConfig> for QueueNames {
    fn from(config: &crate::config::BrokerConfig) -> Self {
        Self::new(config.fetch_queue.clone(), config.calculate_queue.clone())
    }
}

/// Researcher reference carried by a fetch request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ResearcherRef {
    pub researcher_id: Uuid,
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[validate(length(min = 1, max = 64), custom(function = "validate_scholar_id"))]
    pub scholar_id: String,
}

/// Ask the scraper worker to fetch one researcher's publications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FetchRequest {
    pub admin_id: Uuid,
    #[validate(nested)]
    pub researcher: ResearcherRef,
}

impl FetchRequest {
    pub fn new(admin_id: Uuid, researcher_id: Uuid, name: &str, scholar_id: &str) -> Self {
        Self {
            admin_id,
            researcher: ResearcherRef {
                researcher_id,
                name: name.to_string(),
                scholar_id: scholar_id.to_string(),
            },
        }
    }
}

/// Ask the calculator worker to recompute metrics and tags for a researcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CalculateRequest {
    pub researcher_id: Uuid,
}

/// A payload bound to one queue
pub trait PipelinePayload: Serialize + DeserializeOwned + Validate + Sized {
    const KIND: MessageKind;

    /// Parse and validate a raw message body
    fn decode(body: &str) -> Result<Self> {
        let payload: Self = serde_json::from_str(body).map_err(|e| AppError::InvalidMessage {
            queue: format!("{:?}", Self::KIND),
            message: e.to_string(),
        })?;
        payload.validate().map_err(|e| AppError::InvalidMessage {
            queue: format!("{:?}", Self::KIND),
            message: e.to_string(),
        })?;
        Ok(payload)
    }

    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl PipelinePayload for FetchRequest {
    const KIND: MessageKind = MessageKind::Fetch;
}

impl PipelinePayload for CalculateRequest {
    const KIND: MessageKind = MessageKind::Calculate;
}

/// Tagged view over both payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineMessage {
    Fetch(FetchRequest),
    Calculate(CalculateRequest),
}

impl PipelineMessage {
    pub fn decode(kind: MessageKind, body: &str) -> Result<Self> {
        match kind {
            MessageKind::Fetch => FetchRequest::decode(body).map(Self::Fetch),
            MessageKind::Calculate => CalculateRequest::decode(body).map(Self::Calculate),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Fetch(_) => MessageKind::Fetch,
            Self::Calculate(_) => MessageKind::Calculate,
        }
    }

    pub fn encode(&self) -> Result<String> {
        match self {
            Self::Fetch(m) => m.encode(),
            Self::Calculate(m) => m.encode(),
        }
    }
}

impl From<FetchRequest> for PipelineMessage {
    fn from(m: FetchRequest) -> Self {
        Self::Fetch(m)
    }
}

impl From<CalculateRequest> for PipelineMessage {
    fn from(m: CalculateRequest) -> Self {
        Self::Calculate(m)
    }
}

fn validate_scholar_id(id: &str) -> std::result::Result<(), ValidationError> {
    if id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(ValidationError::new("scholar_id"))
    }
}
