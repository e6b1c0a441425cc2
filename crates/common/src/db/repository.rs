//! Postgres implementation of the persistence contract

use crate::citation::CitationMetrics;
use crate::db::models::*;
use crate::db::{DbPool, ScholarStore};
use crate::errors::{AppError, Result};
use crate::scholar::{Paper, Researcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

/// Rows per INSERT statement, keeping bind parameters under the Postgres limit
const INSERT_CHUNK: usize = 1000;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    async fn insert_with<C: ConnectionTrait>(conn: &C, papers: &[Paper]) -> Result<usize> {
        for chunk in papers.chunks(INSERT_CHUNK) {
            let rows = chunk
                .iter()
                .map(PaperActiveModel::try_from)
                .collect::<Result<Vec<_>>>()?;
            PaperEntity::insert_many(rows).exec(conn).await?;
        }
        Ok(papers.len())
    }

    async fn purge_with<C: ConnectionTrait>(conn: &C, researcher_id: Uuid) -> Result<u64> {
        let result = PaperEntity::delete_many()
            .filter(PaperColumn::ResearcherId.eq(researcher_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}

#[async_trait]
impl ScholarStore for Repository {
    async fn find_researcher(&self, id: Uuid) -> Result<Option<Researcher>> {
        ResearcherEntity::find_by_id(id)
            .one(self.conn())
            .await?
            .map(Researcher::try_from)
            .transpose()
    }

    async fn find_papers_by_researcher(&self, researcher_id: Uuid) -> Result<Vec<Paper>> {
        PaperEntity::find()
            .filter(PaperColumn::ResearcherId.eq(researcher_id))
            .order_by_desc(PaperColumn::TotalCitations)
            .all(self.conn())
            .await?
            .into_iter()
            .map(Paper::try_from)
            .collect()
    }

    async fn upsert_researcher_metrics(
        &self,
        researcher_id: Uuid,
        metrics: &CitationMetrics,
        last_fetch: Option<DateTime<Utc>>,
    ) -> Result<Researcher> {
        let row = ResearcherEntity::find_by_id(researcher_id)
            .one(self.conn())
            .await?
            .ok_or(AppError::ResearcherNotFound { id: researcher_id })?;

        let mut active: ResearcherActiveModel = row.into();
        active.total_papers = Set(metrics.total_papers as i32);
        active.h_index = Set(metrics.h_index as i32);
        active.i10_index = Set(metrics.i10_index as i32);
        active.citations = Set(metrics.total_citations as i64);
        if let Some(at) = last_fetch {
            active.last_fetch = Set(Some(at.into()));
        }
        active.updated_at = Set(Utc::now().into());

        let row = active.update(self.conn()).await?;
        Researcher::try_from(row)
    }

    async fn insert_papers(&self, papers: &[Paper]) -> Result<usize> {
        // insert_many rejects an empty batch
        if papers.is_empty() {
            return Ok(0);
        }
        Self::insert_with(self.conn(), papers).await
    }

    async fn purge_papers(&self, researcher_id: Uuid) -> Result<u64> {
        Self::purge_with(self.conn(), researcher_id).await
    }

    async fn replace_papers(&self, researcher_id: Uuid, papers: &[Paper]) -> Result<usize> {
        let txn = self.conn().begin().await?;

        let purged = Self::purge_with(&txn, researcher_id).await?;
        let inserted = if papers.is_empty() {
            0
        } else {
            Self::insert_with(&txn, papers).await?
        };

        txn.commit().await?;
        debug!(researcher_id = %researcher_id, purged, inserted, "Replaced papers");
        Ok(inserted)
    }

    async fn update_paper_tags(&self, paper_id: Uuid, tags: &[String]) -> Result<()> {
        let result = PaperEntity::update_many()
            .col_expr(PaperColumn::Tags, Expr::value(serde_json::to_value(tags)?))
            .filter(PaperColumn::Id.eq(paper_id))
            .exec(self.conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::PaperNotFound { id: paper_id });
        }
        Ok(())
    }

    async fn stamp_department(&self, researcher_id: Uuid, department: &str) -> Result<u64> {
        let result = PaperEntity::update_many()
            .col_expr(PaperColumn::Department, Expr::value(department))
            .filter(PaperColumn::ResearcherId.eq(researcher_id))
            .exec(self.conn())
            .await?;
        Ok(result.rows_affected)
    }
}
