//! Persistence contract consumed by the pipeline workers

use crate::citation::CitationMetrics;
use crate::errors::Result;
use crate::scholar::{Paper, Researcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Researcher and paper storage used by both workers.
///
/// Researchers are created by the API layer; the pipeline only updates their
/// metrics, so every researcher-scoped write fails with
/// `AppError::ResearcherNotFound` for an unknown id.
#[async_trait]
pub trait ScholarStore: Send + Sync {
    async fn find_researcher(&self, id: Uuid) -> Result<Option<Researcher>>;

    /// All papers attributed to a researcher, most cited first
    async fn find_papers_by_researcher(&self, researcher_id: Uuid) -> Result<Vec<Paper>>;

    /// Overwrite a researcher's derived metrics and return the updated record.
    ///
    /// `last_fetch` is left untouched when `None`.
    async fn upsert_researcher_metrics(
        &self,
        researcher_id: Uuid,
        metrics: &CitationMetrics,
        last_fetch: Option<DateTime<Utc>>,
    ) -> Result<Researcher>;

    /// Bulk insert, returns the number of rows written
    async fn insert_papers(&self, papers: &[Paper]) -> Result<usize>;

    /// Delete every paper of a researcher, returns the number removed
    async fn purge_papers(&self, researcher_id: Uuid) -> Result<u64>;

    /// Swap a researcher's papers for a freshly fetched set
    async fn replace_papers(&self, researcher_id: Uuid, papers: &[Paper]) -> Result<usize> {
        self.purge_papers(researcher_id).await?;
        self.insert_papers(papers).await
    }

    async fn update_paper_tags(&self, paper_id: Uuid, tags: &[String]) -> Result<()>;

    /// Stamp a department onto every paper of a researcher
    async fn stamp_department(&self, researcher_id: Uuid, department: &str) -> Result<u64>;
}
