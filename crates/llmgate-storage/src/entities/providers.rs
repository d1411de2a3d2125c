use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// `provider_type` distinguishes upstreams that expose the full admin API
/// (pricing/token/balance/checkin) from "key_only" upstreams configured with
/// a single bearer key, whose model list is discovered via `/v1/models`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "provider_name")]
    pub name: String,
    pub provider_type: String,
    pub base_url: String,
    pub admin_token: Option<String>,
    pub api_key: Option<String>,
    pub user_id: Option<i64>,
    pub enabled: bool,
    pub priority: i32,
    pub weight: i32,
    pub checkin_enabled: bool,
    pub last_checkin_at: Option<OffsetDateTime>,
    pub last_synced_at: Option<OffsetDateTime>,
    pub balance_display: Option<String>,
    pub balance_usd: Option<f64>,
    pub pricing_group_ratio: Json,
    pub model_alias_mapping: Json,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub credentials: HasMany<super::credentials::Entity>,
    #[sea_orm(has_many)]
    pub pricing: HasMany<super::pricing::Entity>,
    #[sea_orm(has_many)]
    pub routes: HasMany<super::routes::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_key_only(&self) -> bool {
        self.provider_type == "key_only"
    }
}
