use serde::{Deserialize, Serialize};

/// Mirrors the upstream's standard response envelope
/// (`{"success":bool,"message":string,"data":...}`).
#[derive(Debug, Deserialize)]
pub struct UpstreamEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_data")]
    pub data: T,
}

fn default_data<T: Default>() -> T {
    T::default()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamPricing {
    pub model_name: String,
    pub quota_type: i32,
    pub model_ratio: f64,
    #[serde(default)]
    pub model_price: f64,
    #[serde(default = "default_completion_ratio")]
    pub completion_ratio: f64,
    #[serde(default)]
    pub enable_groups: Vec<String>,
}

fn default_completion_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamToken {
    pub id: i64,
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub status: i32,
    #[serde(rename = "group", default)]
    pub group_name: String,
    #[serde(default)]
    pub remain_quota: i64,
    #[serde(default)]
    pub unlimited_quota: bool,
    #[serde(default)]
    pub model_limits_enabled: bool,
    #[serde(default)]
    pub model_limits: String,
}

impl UpstreamToken {
    pub fn is_enabled(&self) -> bool {
        self.status == 1
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamUserSelf {
    pub id: i64,
    #[serde(rename = "quota")]
    pub balance_units: i64,
    pub status: i32,
}

/// Upstream balances are denominated in units of 1/500000 USD (§4.G).
pub const BALANCE_UNITS_PER_USD: f64 = 500_000.0;

impl UpstreamUserSelf {
    pub fn balance_usd(&self) -> f64 {
        (self.balance_units.max(0) as f64) / BALANCE_UNITS_PER_USD
    }

    pub fn balance_display(&self) -> String {
        format!("${:.2}", self.balance_usd())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamCheckinData {
    #[serde(default)]
    pub quota_awarded: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamModelListEntry {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamModelList {
    #[serde(default)]
    pub data: Vec<UpstreamModelListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTokenRequest {
    pub name: String,
    #[serde(rename = "group")]
    pub group_name: String,
    pub unlimited_quota: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remain_quota: Option<i64>,
}
