//! Paper entity
//!
//! The owning researcher is denormalized into `researcher_*` columns as it
//! was at insertion time.

use crate::errors::AppError;
use crate::scholar::{Attribution, Paper, ResearcherSnapshot};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub researcher_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub researcher_name: String,

    #[sea_orm(column_type = "Text")]
    pub scholar_id: String,

    #[sea_orm(column_type = "Text")]
    pub department: String,

    pub admin_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub link: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub authors: Json,

    /// Year as text, empty when unknown
    #[sea_orm(column_type = "Text")]
    pub publication_date: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub journal: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub volume: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub issue: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pages: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub publisher: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub total_citations: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub publication_link: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pdf_link: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub tags: Json,

    /// Prior admin/department attributions
    #[sea_orm(column_type = "JsonBinary")]
    pub previous: Json,

    pub last_fetch: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::researcher::Entity",
        from = "Column::ResearcherId",
        to = "super::researcher::Column::Id",
        on_delete = "Cascade"
    )]
    Researcher,
}

impl Related<super::researcher::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Researcher.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Paper {
    type Error = AppError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let authors: Vec<String> = serde_json::from_value(model.authors)?;
        let tags: Vec<String> = serde_json::from_value(model.tags)?;
        let previous: Vec<Attribution> = serde_json::from_value(model.previous)?;

        Ok(Paper {
            id: model.id,
            researcher: ResearcherSnapshot {
                researcher_id: model.researcher_id,
                name: model.researcher_name,
                scholar_id: model.scholar_id,
                department: model.department,
            },
            admin_id: model.admin_id,
            title: model.title,
            link: model.link,
            authors,
            publication_date: model.publication_date,
            journal: model.journal,
            volume: model.volume,
            issue: model.issue,
            pages: model.pages,
            publisher: model.publisher,
            description: model.description,
            total_citations: model.total_citations.max(0) as u32,
            publication_link: model.publication_link,
            pdf_link: model.pdf_link,
            tags,
            previous,
            last_fetch: model.last_fetch.to_utc(),
        })
    }
}

impl TryFrom<&Paper> for ActiveModel {
    type Error = AppError;

    fn try_from(paper: &Paper) -> Result<Self, Self::Error> {
        Ok(ActiveModel {
            id: Set(paper.id),
            researcher_id: Set(paper.researcher.researcher_id),
            researcher_name: Set(paper.researcher.name.clone()),
            scholar_id: Set(paper.researcher.scholar_id.clone()),
            department: Set(paper.researcher.department.clone()),
            admin_id: Set(paper.admin_id),
            title: Set(paper.title.clone()),
            link: Set(paper.link.clone()),
            authors: Set(serde_json::to_value(&paper.authors)?),
            publication_date: Set(paper.publication_date.clone()),
            journal: Set(paper.journal.clone()),
            volume: Set(paper.volume.clone()),
            issue: Set(paper.issue.clone()),
            pages: Set(paper.pages.clone()),
            publisher: Set(paper.publisher.clone()),
            description: Set(paper.description.clone()),
            total_citations: Set(i32::try_from(paper.total_citations).unwrap_or(i32::MAX)),
            publication_link: Set(paper.publication_link.clone()),
            pdf_link: Set(paper.pdf_link.clone()),
            tags: Set(serde_json::to_value(&paper.tags)?),
            previous: Set(serde_json::to_value(&paper.previous)?),
            last_fetch: Set(paper.last_fetch.into()),
            created_at: Set(chrono::Utc::now().into()),
        })
    }
}
