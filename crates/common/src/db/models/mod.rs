//! SeaORM entity models
//!
//! Database entities for ScholarFlow

mod paper;
mod researcher;

pub use paper::{
    Entity as PaperEntity,
    Model as PaperRow,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
};

pub use researcher::{
    Entity as ResearcherEntity,
    Model as ResearcherRow,
    ActiveModel as ResearcherActiveModel,
    Column as ResearcherColumn,
};
