//! In-memory registry snapshot (§4.C/4.D). Rebuilt wholesale after every
//! sync tick and swapped in atomically; request-time reads never touch the
//! database (§5 concurrency model — stale reads are acceptable between
//! sync ticks).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use llmgate_storage::{HealthStats, StorageSnapshot};

use crate::model_key::AliasTable;

#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub id: i64,
    pub name: String,
    pub provider_type: String,
    pub base_url: String,
    pub enabled: bool,
    pub balance_usd: f64,
    pub pricing_group_ratio: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CredentialInfo {
    pub id: i64,
    pub provider_id: i64,
    pub secret: String,
    pub group_name: String,
    pub enabled: bool,
}

/// A flat, denormalized route row (§4.D: "a flat table read on every
/// request"). One entry per enabled `(provider, credential, model)` route
/// whose provider and credential are both enabled.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub route_id: i64,
    pub provider_id: i64,
    pub credential_id: i64,
    pub model_name: String,
    pub priority: i32,
    pub weight: i32,
    pub unit_cost_usd: f64,
    pub group_name: String,
    /// Raw per-token ratios backing the billed-cost estimate (§4.H) when an
    /// upstream response carries no `cost`/`total_cost` of its own —
    /// distinct from `unit_cost_usd`, which is a fixed-mix estimate used
    /// only for route scoring.
    pub model_ratio: f64,
    pub completion_ratio: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedTokenInfo {
    pub id: i64,
    pub user_id: i64,
    pub enabled: bool,
    pub model_limits_enabled: bool,
    pub model_limits: Vec<String>,
    pub allow_ips: Vec<String>,
    pub expired_at: Option<time::OffsetDateTime>,
}

pub struct RegistryIndex {
    pub providers: HashMap<i64, ProviderInfo>,
    pub credentials: HashMap<i64, CredentialInfo>,
    pub routes: Vec<RouteCandidate>,
    pub aliases_by_provider: HashMap<i64, AliasTable>,
    pub aggregated_tokens: HashMap<String, AggregatedTokenInfo>,
    pub recent_usage_usd: HashMap<(i64, String), f64>,
    pub health: HashMap<(i64, String), HealthStats>,
}

impl RegistryIndex {
    pub fn provider(&self, id: i64) -> Option<&ProviderInfo> {
        self.providers.get(&id)
    }

    pub fn credential(&self, id: i64) -> Option<&CredentialInfo> {
        self.credentials.get(&id)
    }

    pub fn aggregated_token(&self, key_value: &str) -> Option<&AggregatedTokenInfo> {
        self.aggregated_tokens.get(key_value)
    }

    /// Distinct, enabled route model names, for `GET /v1/models` (§6).
    pub fn distinct_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .routes
            .iter()
            .map(|r| r.model_name.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }
}

/// Unit cost per §4.E step 3: per-call pricing uses `model_price × ratio`;
/// per-token pricing approximates a 2:1 prompt:completion mix, matching the
/// reference implementation's fixed-mix cost estimate used for route scoring
/// (not for billed cost, which is computed per-request from actual tokens).
fn unit_cost_usd(
    pricing: &llmgate_storage::PricingRow,
    group_ratio: f64,
) -> f64 {
    let is_per_call = pricing.quota_type == 1 || pricing.model_price > 0.0;
    let completion_ratio = if pricing.completion_ratio > 0.0 {
        pricing.completion_ratio
    } else {
        1.0
    };
    let base = if is_per_call {
        pricing.model_price
    } else {
        pricing.model_ratio * 2.0 + pricing.model_ratio * 2.0 * completion_ratio
    };
    base * group_ratio
}

fn group_ratio(pricing_group_ratio: &serde_json::Value, group_name: &str) -> f64 {
    pricing_group_ratio
        .as_object()
        .and_then(|m| m.get(group_name))
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(1.0)
}

pub fn build(
    snapshot: &StorageSnapshot,
    recent_usage_usd: HashMap<(i64, String), f64>,
    health: HashMap<(i64, String), HealthStats>,
) -> RegistryIndex {
    let mut providers = HashMap::new();
    let mut aliases_by_provider = HashMap::new();
    for row in &snapshot.providers {
        aliases_by_provider.insert(row.id, AliasTable::from_json(&row.model_alias_mapping));
        providers.insert(
            row.id,
            ProviderInfo {
                id: row.id,
                name: row.name.clone(),
                provider_type: row.provider_type.clone(),
                base_url: row.base_url.clone(),
                enabled: row.enabled,
                balance_usd: row.balance_usd.unwrap_or(0.0).max(0.0),
                pricing_group_ratio: row.pricing_group_ratio.clone(),
            },
        );
    }

    let mut credentials = HashMap::new();
    for row in &snapshot.credentials {
        credentials.insert(
            row.id,
            CredentialInfo {
                id: row.id,
                provider_id: row.provider_id,
                secret: row.secret.clone(),
                group_name: row.group_name.clone(),
                enabled: row.enabled,
            },
        );
    }

    let mut pricing_by_provider_model: HashMap<(i64, String), &llmgate_storage::PricingRow> =
        HashMap::new();
    for row in &snapshot.pricing {
        pricing_by_provider_model.insert((row.provider_id, row.model_name.clone()), row);
    }

    let mut routes = Vec::new();
    for route in &snapshot.routes {
        if !route.enabled {
            continue;
        }
        let Some(provider) = providers.get(&route.provider_id) else {
            continue;
        };
        let Some(credential) = credentials.get(&route.credential_id) else {
            continue;
        };
        if !provider.enabled || !credential.enabled {
            continue;
        }
        let pricing = pricing_by_provider_model.get(&(route.provider_id, route.model_name.clone()));
        let unit_cost = pricing
            .map(|pricing| {
                let ratio = group_ratio(&provider.pricing_group_ratio, &credential.group_name);
                unit_cost_usd(pricing, ratio)
            })
            .unwrap_or(0.0);

        routes.push(RouteCandidate {
            route_id: route.id,
            provider_id: route.provider_id,
            credential_id: route.credential_id,
            model_name: route.model_name.clone(),
            priority: route.priority,
            weight: route.weight,
            unit_cost_usd: unit_cost,
            group_name: credential.group_name.clone(),
            model_ratio: pricing.map(|p| p.model_ratio).unwrap_or(0.0),
            completion_ratio: pricing.map(|p| p.completion_ratio).unwrap_or(1.0),
        });
    }

    let mut aggregated_tokens = HashMap::new();
    for row in &snapshot.aggregated_tokens {
        aggregated_tokens.insert(
            row.key_value.clone(),
            AggregatedTokenInfo {
                id: row.id,
                user_id: row.user_id,
                enabled: row.enabled,
                model_limits_enabled: row.model_limits_enabled,
                model_limits: row
                    .model_limits
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                allow_ips: row
                    .allow_ips
                    .lines()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                expired_at: row.expired_at,
            },
        );
    }

    RegistryIndex {
        providers,
        credentials,
        routes,
        aliases_by_provider,
        aggregated_tokens,
        recent_usage_usd,
        health,
    }
}

/// Hot-swappable holder for the registry, refreshed after each sync tick.
pub struct Registry {
    inner: ArcSwap<RegistryIndex>,
}

impl Registry {
    pub fn new(index: RegistryIndex) -> Arc<Self> {
        Arc::new(Self {
            inner: ArcSwap::from_pointee(index),
        })
    }

    pub fn load(&self) -> arc_swap::Guard<Arc<RegistryIndex>> {
        self.inner.load()
    }

    pub fn swap(&self, index: RegistryIndex) {
        self.inner.store(Arc::new(index));
    }
}
