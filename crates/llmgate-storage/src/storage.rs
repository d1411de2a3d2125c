use async_trait::async_trait;
use time::OffsetDateTime;

use llmgate_common::GlobalConfig;

use crate::snapshot::{
    AggregatedTokenRow, CredentialRow, GlobalConfigRow, PricingRow, ProviderRow, RouteRow,
    StorageSnapshot,
};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

/// A freshly pulled credential, keyed by its id on the upstream side.
#[derive(Debug, Clone)]
pub struct CredentialUpsert {
    pub upstream_token_id: Option<i64>,
    pub secret: String,
    pub group_name: String,
    pub enabled: bool,
    pub remain_quota: Option<i64>,
    pub unlimited_quota: bool,
    pub model_limits: String,
}

#[derive(Debug, Clone)]
pub struct PricingUpsert {
    pub model_name: String,
    pub quota_type: i32,
    pub model_ratio: f64,
    pub completion_ratio: f64,
    pub model_price: f64,
    pub enable_groups: serde_json::Value,
}

/// One `(model_name, credential_id)` row the synchronizer wants routed,
/// before preservation of prior `enabled/priority/weight` overrides.
#[derive(Debug, Clone)]
pub struct RouteSeed {
    pub credential_id: i64,
    pub model_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewObservation {
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
    pub status: i32,
    pub error_message: Option<String>,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthStats {
    pub success_count: i64,
    pub error_count: i64,
    pub sample_count: i64,
    pub mean_response_time_ms: f64,
}

/// Storage is used for:
/// - bootstrap (load_snapshot)
/// - the synchronizer (provider/credential/pricing/route writes)
/// - the retry pipeline's observation writes
/// - the in-scope admin surface (options)
///
/// Runtime route selection reads must NOT hit the DB; they read from the
/// in-memory registry snapshot rebuilt after each sync tick.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn sync(&self) -> StorageResult<()>;

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>>;
    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()>;

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    async fn providers_enabled(&self) -> StorageResult<Vec<ProviderRow>>;
    async fn provider_by_id(&self, provider_id: i64) -> StorageResult<Option<ProviderRow>>;
    async fn insert_provider(&self, row: &ProviderRow) -> StorageResult<i64>;

    async fn record_sync_success(
        &self,
        provider_id: i64,
        balance_display: Option<&str>,
        balance_usd: Option<f64>,
        at: OffsetDateTime,
    ) -> StorageResult<()>;

    async fn record_checkin_result(
        &self,
        provider_id: i64,
        checkin_enabled: Option<bool>,
        last_checkin_at: Option<OffsetDateTime>,
    ) -> StorageResult<()>;

    async fn providers_checkin_enabled(&self) -> StorageResult<Vec<ProviderRow>>;

    async fn replace_pricing(
        &self,
        provider_id: i64,
        rows: Vec<PricingUpsert>,
        at: OffsetDateTime,
    ) -> StorageResult<()>;
    async fn pricing_for_provider(&self, provider_id: i64) -> StorageResult<Vec<PricingRow>>;

    /// Upserts credentials by `upstream_token_id` and deletes local rows not
    /// present in `keep_upstream_token_ids` (spec §4.G).
    async fn reconcile_credentials(
        &self,
        provider_id: i64,
        rows: Vec<CredentialUpsert>,
    ) -> StorageResult<()>;
    async fn credentials_for_provider(&self, provider_id: i64) -> StorageResult<Vec<CredentialRow>>;

    /// Transactional delete-all-for-provider + batch insert of 50, preserving
    /// `enabled/priority/weight` for matching `(model_name, credential_id)`
    /// pairs (spec §4.D).
    async fn rebuild_routes(&self, provider_id: i64, seeds: Vec<RouteSeed>) -> StorageResult<()>;
    async fn routes_enabled(&self) -> StorageResult<Vec<RouteRow>>;
    async fn set_route_overrides(
        &self,
        route_id: i64,
        enabled: Option<bool>,
        priority: Option<i32>,
        weight: Option<i32>,
    ) -> StorageResult<()>;

    async fn aggregated_tokens(&self) -> StorageResult<Vec<AggregatedTokenRow>>;

    async fn insert_observation(&self, obs: NewObservation) -> StorageResult<()>;

    /// Sum of `cost_usd` per `(credential_id, model_name)` over the window,
    /// `status=1` only (spec §4.B recent cost).
    async fn recent_cost(
        &self,
        window_hours: i64,
    ) -> StorageResult<std::collections::HashMap<(i64, String), f64>>;

    /// Per `(credential_id, model_name)` health stats over the window
    /// (spec §4.B health stats).
    async fn health_stats(
        &self,
        window_hours: i64,
    ) -> StorageResult<std::collections::HashMap<(i64, String), HealthStats>>;

    async fn get_option(&self, key: &str) -> StorageResult<Option<String>>;
    async fn list_options(&self) -> StorageResult<Vec<(String, String)>>;
    async fn set_option(&self, key: &str, value: &str) -> StorageResult<()>;
}
