//! Route selection engine (§4.E): candidate filter → enrichment → per-route
//! metrics → contribution → weighted-random tier ordering.

use rand::Rng;

use crate::model_key::matches as model_matches;
use crate::options::RoutingOptions;
use crate::registry::{RegistryIndex, RouteCandidate};

#[derive(Debug, Clone)]
pub struct RouteAttempt {
    pub route_id: i64,
    pub provider_id: i64,
    pub credential_id: i64,
    pub model_name: String,
    pub secret: String,
    pub base_url: String,
    pub provider_type: String,
    pub contribution: f64,
    pub value_score: f64,
    pub balance_usd: f64,
    pub recent_usage_usd: f64,
    pub model_ratio: f64,
    pub completion_ratio: f64,
}

/// One priority tier's worth of attempts, already in exploration order.
pub type Tier = Vec<RouteAttempt>;

struct ScoredCandidate<'a> {
    route: &'a RouteCandidate,
    value_score: f64,
    balance_usd: f64,
    recent_usage_usd: f64,
    health_multiplier: f64,
}

pub fn plan(
    requested_model: &str,
    registry: &RegistryIndex,
    options: &RoutingOptions,
) -> Vec<Tier> {
    // Step 1 — candidate filter + step 2 enrichment (provider/credential
    // liveness is already enforced by `registry::build`).
    let empty_aliases = crate::model_key::AliasTable::empty();
    let candidates: Vec<&RouteCandidate> = registry
        .routes
        .iter()
        .filter(|route| {
            let aliases = registry
                .aliases_by_provider
                .get(&route.provider_id)
                .unwrap_or(&empty_aliases);
            model_matches(requested_model, &route.model_name, aliases)
        })
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    // Step 3 — per-route metrics.
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|route| {
            let provider = registry.provider(route.provider_id);
            let balance_usd = provider.map(|p| p.balance_usd.max(0.0)).unwrap_or(0.0);
            let recent_usage_usd = registry
                .recent_usage_usd
                .get(&(route.credential_id, route.model_name.clone()))
                .copied()
                .unwrap_or(0.0)
                .max(0.0);

            let cost_score = if route.unit_cost_usd <= 0.0 {
                0.5
            } else {
                1.0 / (1.0 + route.unit_cost_usd)
            };
            let budget_score = (balance_usd + 1.0) / (balance_usd + recent_usage_usd + 1.0);
            let value_score = cost_score * budget_score;

            let health_multiplier = if options.health_adjustment_enabled {
                registry
                    .health
                    .get(&(route.credential_id, route.model_name.clone()))
                    .filter(|stats| stats.sample_count >= options.min_samples)
                    .map(|stats| health_multiplier(stats, options))
                    .unwrap_or(1.0)
            } else {
                1.0
            };

            ScoredCandidate {
                route,
                value_score,
                balance_usd,
                recent_usage_usd,
                health_multiplier,
            }
        })
        .collect();

    // Step 5 tiers by priority descending; step 4's `max_score` is computed
    // per tier, so group first.
    scored.sort_by(|a, b| b.route.priority.cmp(&a.route.priority));

    let (base_factor, value_factor) = options.effective_factors();

    let mut tiers: Vec<Tier> = Vec::new();
    let mut start = 0;
    while start < scored.len() {
        let priority = scored[start].route.priority;
        let mut end = start;
        while end < scored.len() && scored[end].route.priority == priority {
            end += 1;
        }
        let tier_slice = &scored[start..end];

        let max_score = tier_slice
            .iter()
            .map(|c| c.value_score)
            .fold(0.0_f64, f64::max);

        let mut attempts: Vec<(RouteAttempt, f64)> = tier_slice
            .iter()
            .map(|c| {
                let base = (c.route.weight + 10).max(0) as f64;
                let normalized = if max_score > 0.0 {
                    (c.value_score / max_score).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let multiplier_v = base_factor + normalized * value_factor;
                let contribution = (base * multiplier_v * c.health_multiplier).max(0.0001);

                let provider = registry.provider(c.route.provider_id);
                let credential = registry.credential(c.route.credential_id);
                let attempt = RouteAttempt {
                    route_id: c.route.route_id,
                    provider_id: c.route.provider_id,
                    credential_id: c.route.credential_id,
                    model_name: c.route.model_name.clone(),
                    secret: credential.map(|cr| cr.secret.clone()).unwrap_or_default(),
                    base_url: provider.map(|p| p.base_url.clone()).unwrap_or_default(),
                    provider_type: provider.map(|p| p.provider_type.clone()).unwrap_or_default(),
                    contribution,
                    value_score: c.value_score,
                    balance_usd: c.balance_usd,
                    recent_usage_usd: c.recent_usage_usd,
                    model_ratio: c.route.model_ratio,
                    completion_ratio: c.route.completion_ratio,
                };
                (attempt, contribution)
            })
            .collect();

        tiers.push(weighted_shuffle(&mut attempts));
        start = end;
    }

    tiers
}

fn health_multiplier(stats: &llmgate_storage::HealthStats, options: &RoutingOptions) -> f64 {
    let total = stats.sample_count.max(1) as f64;
    let success_rate = (stats.success_count as f64 / total).clamp(0.0, 1.0);
    let fail_rate = (stats.error_count as f64 / total).clamp(0.0, 1.0);

    let latency = stats.mean_response_time_ms;
    let latency_score = if latency <= 1500.0 {
        1.0
    } else if latency >= 10_000.0 {
        0.0
    } else {
        1.0 - (latency - 1500.0) / (10_000.0 - 1500.0)
    };

    let health_score = 0.75 * success_rate + 0.25 * latency_score;
    let confidence = (stats.sample_count as f64 / 50.0).min(1.0);
    let multiplier = (-options.alpha * fail_rate).exp() * (1.0 + options.beta * health_score * confidence);
    multiplier.clamp(options.min_multiplier, options.max_multiplier)
}

/// Weighted random shuffle without replacement (§4.E step 5): repeatedly
/// pick one remaining item with probability proportional to its weight
/// (uniform when the remaining total is ≤ 0), emit it, remove it.
fn weighted_shuffle(items: &mut Vec<(RouteAttempt, f64)>) -> Vec<RouteAttempt> {
    let mut rng = rand::rng();
    let mut ordered = Vec::with_capacity(items.len());

    while !items.is_empty() {
        let total: f64 = items.iter().map(|(_, w)| w).sum();
        let idx = if total <= 0.0 {
            rng.random_range(0..items.len())
        } else {
            let mut pick = rng.random_range(0.0..total);
            let mut chosen = items.len() - 1;
            for (i, (_, weight)) in items.iter().enumerate() {
                if pick < *weight {
                    chosen = i;
                    break;
                }
                pick -= weight;
            }
            chosen
        };
        let (attempt, _) = items.remove(idx);
        ordered.push(attempt);
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_storage::HealthStats;
    use std::collections::HashMap;

    fn registry_with_two_providers() -> RegistryIndex {
        use crate::registry::{CredentialInfo, ProviderInfo, RouteCandidate};

        let mut providers = HashMap::new();
        providers.insert(
            1,
            ProviderInfo {
                id: 1,
                name: "p1".into(),
                provider_type: "full".into(),
                base_url: "https://p1.example".into(),
                enabled: true,
                balance_usd: 5.0,
                pricing_group_ratio: serde_json::json!({}),
            },
        );
        providers.insert(
            2,
            ProviderInfo {
                id: 2,
                name: "p2".into(),
                provider_type: "full".into(),
                base_url: "https://p2.example".into(),
                enabled: true,
                balance_usd: 50.0,
                pricing_group_ratio: serde_json::json!({}),
            },
        );

        let mut credentials = HashMap::new();
        credentials.insert(
            1,
            CredentialInfo {
                id: 1,
                provider_id: 1,
                secret: "sk-p1".into(),
                group_name: "default".into(),
                enabled: true,
            },
        );
        credentials.insert(
            2,
            CredentialInfo {
                id: 2,
                provider_id: 2,
                secret: "sk-p2".into(),
                group_name: "default".into(),
                enabled: true,
            },
        );

        let routes = vec![
            RouteCandidate {
                route_id: 1,
                provider_id: 1,
                credential_id: 1,
                model_name: "gpt-4o".into(),
                priority: 10,
                weight: 20,
                unit_cost_usd: 0.01,
                group_name: "default".into(),
                model_ratio: 1.0,
                completion_ratio: 1.0,
            },
            RouteCandidate {
                route_id: 2,
                provider_id: 2,
                credential_id: 2,
                model_name: "gpt-4o".into(),
                priority: 10,
                weight: 10,
                unit_cost_usd: 0.005,
                group_name: "default".into(),
                model_ratio: 0.5,
                completion_ratio: 1.0,
            },
        ];

        RegistryIndex {
            providers,
            credentials,
            routes,
            aliases_by_provider: HashMap::new(),
            aggregated_tokens: HashMap::new(),
            recent_usage_usd: HashMap::new(),
            health: HashMap::new(),
        }
    }

    #[test]
    fn single_tier_contains_both_candidates() {
        let registry = registry_with_two_providers();
        let tiers = plan("gpt-4o", &registry, &RoutingOptions::default());
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].len(), 2);
    }

    #[test]
    fn cheaper_higher_budget_route_scores_higher_value() {
        let registry = registry_with_two_providers();
        let tiers = plan("gpt-4o", &registry, &RoutingOptions::default());
        let p2 = tiers[0]
            .iter()
            .find(|a| a.provider_id == 2)
            .expect("p2 present");
        let p1 = tiers[0]
            .iter()
            .find(|a| a.provider_id == 1)
            .expect("p1 present");
        assert!(p2.value_score > p1.value_score);
    }

    #[test]
    fn unknown_model_yields_no_tiers() {
        let registry = registry_with_two_providers();
        let tiers = plan("claude-3-5-sonnet", &registry, &RoutingOptions::default());
        assert!(tiers.is_empty());
    }

    #[test]
    fn health_multiplier_disabled_below_min_samples() {
        let mut registry = registry_with_two_providers();
        registry.health.insert(
            (1, "gpt-4o".to_string()),
            HealthStats {
                success_count: 1,
                error_count: 4,
                sample_count: 5,
                mean_response_time_ms: 20_000.0,
            },
        );
        let mut options = RoutingOptions::default();
        options.min_samples = 100;
        let tiers = plan("gpt-4o", &registry, &options);
        // With health adjustment suppressed, multiplier is 1 for both, so
        // relative ordering is driven purely by weight/value contribution.
        assert_eq!(tiers[0].len(), 2);
    }
}
