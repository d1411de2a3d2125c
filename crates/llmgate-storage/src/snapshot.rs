use llmgate_common::GlobalConfig;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct GlobalConfigRow {
    pub id: i64,
    pub config: GlobalConfig,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: i64,
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
    pub pricing_group_ratio: JsonValue,
    pub model_alias_mapping: JsonValue,
}

#[derive(Debug, Clone)]
pub struct CredentialRow {
    pub id: i64,
    pub provider_id: i64,
    pub upstream_token_id: Option<i64>,
    pub secret: String,
    pub group_name: String,
    pub enabled: bool,
    pub remain_quota: Option<i64>,
    pub unlimited_quota: bool,
    pub model_limits: String,
}

#[derive(Debug, Clone)]
pub struct PricingRow {
    pub id: i64,
    pub provider_id: i64,
    pub model_name: String,
    pub quota_type: i32,
    pub model_ratio: f64,
    pub completion_ratio: f64,
    pub model_price: f64,
    pub enable_groups: JsonValue,
}

#[derive(Debug, Clone)]
pub struct RouteRow {
    pub id: i64,
    pub provider_id: i64,
    pub credential_id: i64,
    pub model_name: String,
    pub enabled: bool,
    pub priority: i32,
    pub weight: i32,
}

#[derive(Debug, Clone)]
pub struct AggregatedTokenRow {
    pub id: i64,
    pub user_id: i64,
    pub key_value: String,
    pub enabled: bool,
    pub model_limits_enabled: bool,
    pub model_limits: String,
    pub allow_ips: String,
    pub expired_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub global_config: Option<GlobalConfigRow>,
    pub providers: Vec<ProviderRow>,
    pub credentials: Vec<CredentialRow>,
    pub pricing: Vec<PricingRow>,
    pub routes: Vec<RouteRow>,
    pub aggregated_tokens: Vec<AggregatedTokenRow>,
    pub options: Vec<(String, String)>,
}
