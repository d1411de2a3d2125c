use sea_orm::entity::prelude::*;

/// Materialized `(model_name, provider, credential)` triple. Rebuilt
/// wholesale per-provider by the synchronizer; `enabled/priority/weight` are
/// preserved across rebuilds for surviving `(model_name, credential_id)`
/// pairs (admin overrides land here too).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "routes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub provider_id: i64,
    pub credential_id: i64,
    pub model_name: String,
    pub enabled: bool,
    pub priority: i32,
    pub weight: i32,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
    #[sea_orm(belongs_to, from = "credential_id", to = "id", on_delete = "Cascade")]
    pub credential: HasOne<super::credentials::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
