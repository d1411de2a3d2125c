use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Client-facing credential, presented with an `ag-` prefix.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "aggregated_tokens")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    #[sea_orm(unique_key = "agg_token_key")]
    pub key_value: String,
    pub name: Option<String>,
    pub enabled: bool,
    pub model_limits_enabled: bool,
    /// Comma-separated model allowlist.
    pub model_limits: String,
    /// Newline-separated IP allowlist; empty means unrestricted.
    pub allow_ips: String,
    pub expired_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
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

    pub fn allow_ips_list(&self) -> Vec<&str> {
        self.allow_ips
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expired_at.is_some_and(|exp| exp <= now)
    }
}
