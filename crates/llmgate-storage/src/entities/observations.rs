use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Append-only per-request outcome record; feeds the cost/health aggregates
/// the route selection engine reads (spec §4.B).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "observations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub request_id: String,
    pub user_id: Option<i64>,
    pub agg_token_id: Option<i64>,
    pub provider_id: Option<i64>,
    pub credential_id: Option<i64>,
    pub model_name: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cache_tokens: i64,
    pub cache_tokens_5m: i64,
    pub cache_tokens_1h: i64,
    pub response_time_ms: i64,
    pub first_token_ms: Option<i64>,
    pub is_stream: bool,
    pub cost_usd: f64,
    /// 1 = ok, 0 = error.
    pub status: i32,
    pub error_message: Option<String>,
    pub client_ip: Option<String>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_success(&self) -> bool {
        self.status == 1 && self.error_message.as_deref().unwrap_or_default().is_empty()
    }
}
