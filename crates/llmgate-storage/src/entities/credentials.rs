use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// An upstream credential (provider-token in the upstream's own vocabulary).
/// For key_only providers there is no separate row here; the provider's own
/// `api_key` plays this role directly.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub provider_id: i64,
    /// Id of this credential on the upstream side; used to reconcile on sync.
    pub upstream_token_id: Option<i64>,
    pub secret: String,
    pub group_name: String,
    pub enabled: bool,
    pub remain_quota: Option<i64>,
    pub unlimited_quota: bool,
    /// Comma-separated model allowlist; empty string means unrestricted.
    pub model_limits: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
    #[sea_orm(has_many)]
    pub routes: HasMany<super::routes::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn model_limits_list(&self) -> Vec<&str> {
        self.model_limits
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}
