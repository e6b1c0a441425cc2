//! Researcher entity

use crate::errors::AppError;
use crate::scholar::{Position, Researcher};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "researchers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", unique)]
    pub scholar_id: String,

    #[sea_orm(column_type = "Text")]
    pub email: String,

    #[sea_orm(column_type = "Text")]
    pub department: String,

    #[sea_orm(column_type = "Text")]
    pub gender: String,

    pub verified: bool,

    pub admin_id: Option<Uuid>,

    /// Employment history as a JSONB array
    #[sea_orm(column_type = "JsonBinary")]
    pub positions: Json,

    /// Admin ids that owned this researcher before
    #[sea_orm(column_type = "JsonBinary")]
    pub previous_admins: Json,

    pub total_papers: i32,

    pub h_index: i32,

    pub i10_index: i32,

    pub citations: i64,

    pub last_fetch: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::paper::Entity")]
    Papers,
}

impl Related<super::paper::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Papers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Researcher {
    type Error = AppError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let positions: Vec<Position> = serde_json::from_value(model.positions)?;
        let previous_admins: Vec<Uuid> = serde_json::from_value(model.previous_admins)?;

        Ok(Researcher {
            id: model.id,
            name: model.name,
            scholar_id: model.scholar_id,
            email: model.email,
            department: model.department,
            gender: model.gender,
            verified: model.verified,
            admin_id: model.admin_id,
            positions,
            previous_admins,
            total_papers: model.total_papers.max(0) as u32,
            h_index: model.h_index.max(0) as u32,
            i10_index: model.i10_index.max(0) as u32,
            citations: model.citations.max(0) as u64,
            last_fetch: model.last_fetch.map(|t| t.to_utc()),
        })
    }
}
