use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Process-wide routing/proxy tuning key-value store (spec §6 Options).
/// Mirrors the in-memory RW-locked map so settings survive restarts.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "options")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub key: String,
    pub value: String,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
