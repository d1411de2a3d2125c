use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// `(provider, model)` pricing row. `quota_type=1` or `model_price>0` means
/// per-call billing; otherwise per-token via `model_ratio`/`completion_ratio`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pricing")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub provider_id: i64,
    pub model_name: String,
    pub quota_type: i32,
    pub model_ratio: f64,
    pub completion_ratio: f64,
    pub model_price: f64,
    pub enable_groups: Json,
    pub last_synced_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_per_call(&self) -> bool {
        self.quota_type == 1 || self.model_price > 0.0
    }

    pub fn enable_groups_list(&self) -> Vec<String> {
        serde_json::from_value::<Vec<String>>(self.enable_groups.clone()).unwrap_or_default()
    }
}
