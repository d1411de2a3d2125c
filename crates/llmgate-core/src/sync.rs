//! Synchronizer (§4.G). Pulls pricing, credentials, and balance from each
//! provider's upstream on a schedule, then rebuilds that provider's flat
//! route table. Grounded on `original_source/service/sync.go`
//! (`SyncProviderData`/`RebuildProviderRoutes`).

use time::OffsetDateTime;
use tracing::warn;

use llmgate_storage::{CredentialUpsert, PricingRow, PricingUpsert, ProviderRow, RouteSeed, Storage};
use llmgate_upstream::{KeyOnlyClient, UpstreamAdminClient, UpstreamPricing, UpstreamToken};

const TOKENS_PAGE_SIZE: u32 = 100;

/// Runs one sync tick for a single provider. Errors are logged and
/// swallowed — a provider that fails to sync keeps its last-known snapshot
/// and is retried on the next tick (§4.G).
pub async fn sync_provider(storage: &dyn Storage, provider: &ProviderRow, proxy: Option<&str>) {
    let result = if provider.provider_type == "key_only" {
        sync_key_only_provider(storage, provider, proxy).await
    } else {
        sync_full_provider(storage, provider, proxy).await
    };

    if let Err(err) = result {
        warn!(provider = %provider.name, provider_id = provider.id, error = %err, "provider sync failed");
    }
}

async fn sync_key_only_provider(
    storage: &dyn Storage,
    provider: &ProviderRow,
    proxy: Option<&str>,
) -> anyhow::Result<()> {
    let api_key = provider
        .api_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("key_only provider has no api_key configured"))?;
    let client = KeyOnlyClient::new(&provider.base_url, api_key, proxy)?;
    let models = client.list_models().await?;

    let pricing_rows: Vec<PricingUpsert> = models
        .into_iter()
        .map(|model_name| PricingUpsert {
            model_name,
            quota_type: 0,
            model_ratio: 1.0,
            completion_ratio: 1.0,
            model_price: 0.0,
            enable_groups: serde_json::json!(["default"]),
        })
        .collect();
    storage
        .replace_pricing(provider.id, pricing_rows, OffsetDateTime::now_utc())
        .await?;

    storage
        .reconcile_credentials(
            provider.id,
            vec![CredentialUpsert {
                upstream_token_id: Some(0),
                secret: api_key.to_string(),
                group_name: "default".to_string(),
                enabled: true,
                remain_quota: None,
                unlimited_quota: true,
                model_limits: String::new(),
            }],
        )
        .await?;

    rebuild_routes_for_provider(storage, provider.id).await?;
    storage
        .record_sync_success(
            provider.id,
            provider.balance_display.as_deref(),
            provider.balance_usd,
            OffsetDateTime::now_utc(),
        )
        .await?;
    Ok(())
}

async fn sync_full_provider(
    storage: &dyn Storage,
    provider: &ProviderRow,
    proxy: Option<&str>,
) -> anyhow::Result<()> {
    let admin_token = provider
        .admin_token
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("provider has no admin_token configured"))?;
    let user_id = provider.user_id.unwrap_or(0);
    let client = UpstreamAdminClient::new(&provider.base_url, admin_token, user_id, proxy)?;

    let mut all_ok = true;
    let mut balance_display: Option<String> = None;
    let mut balance_usd: Option<f64> = None;

    match client.get_pricing().await {
        Ok(pricing) => {
            let rows = pricing.into_iter().map(pricing_to_upsert).collect();
            storage
                .replace_pricing(provider.id, rows, OffsetDateTime::now_utc())
                .await?;
        }
        Err(err) => {
            all_ok = false;
            warn!(provider = %provider.name, error = %err, "pricing pull failed");
        }
    }

    match client.get_all_tokens(TOKENS_PAGE_SIZE).await {
        Ok(tokens) => {
            let rows = tokens.into_iter().map(token_to_upsert).collect();
            storage.reconcile_credentials(provider.id, rows).await?;
        }
        Err(err) => {
            all_ok = false;
            warn!(provider = %provider.name, error = %err, "token pull failed");
        }
    }

    match client.get_user_self().await {
        Ok(user) => {
            balance_display = Some(user.balance_display());
            balance_usd = Some(user.balance_usd());
        }
        Err(err) => {
            all_ok = false;
            warn!(provider = %provider.name, error = %err, "balance pull failed");
        }
    }

    // Route rebuild and `last_synced_at` only advance when every pull in
    // this tick succeeded, so a partial failure never leaves the route
    // table reflecting only half of the upstream's current state.
    if all_ok {
        rebuild_routes_for_provider(storage, provider.id).await?;
        storage
            .record_sync_success(provider.id, balance_display.as_deref(), balance_usd, OffsetDateTime::now_utc())
            .await?;
    }

    Ok(())
}

fn pricing_to_upsert(pricing: UpstreamPricing) -> PricingUpsert {
    PricingUpsert {
        model_name: pricing.model_name,
        quota_type: pricing.quota_type,
        model_ratio: pricing.model_ratio,
        completion_ratio: pricing.completion_ratio,
        model_price: pricing.model_price,
        enable_groups: serde_json::json!(pricing.enable_groups),
    }
}

fn token_to_upsert(token: UpstreamToken) -> CredentialUpsert {
    CredentialUpsert {
        upstream_token_id: Some(token.id),
        secret: token.key,
        group_name: token.group_name,
        enabled: token.is_enabled(),
        remain_quota: if token.unlimited_quota {
            None
        } else {
            Some(token.remain_quota)
        },
        unlimited_quota: token.unlimited_quota,
        model_limits: if token.model_limits_enabled {
            token.model_limits
        } else {
            String::new()
        },
    }
}

/// Rebuilds `provider_id`'s route table from its current pricing and
/// credential rows: for each enabled credential, every model whose pricing
/// `enable_groups` names the credential's group, intersected with the
/// credential's own `model_limits` allowlist when it has one.
async fn rebuild_routes_for_provider(storage: &dyn Storage, provider_id: i64) -> anyhow::Result<()> {
    let pricing = storage.pricing_for_provider(provider_id).await?;
    let credentials = storage.credentials_for_provider(provider_id).await?;

    let mut seeds = Vec::new();
    for credential in &credentials {
        if !credential.enabled {
            continue;
        }
        let allowed: Option<std::collections::HashSet<&str>> = if credential.model_limits.is_empty() {
            None
        } else {
            Some(credential.model_limits.split(',').map(str::trim).collect())
        };

        for price in &pricing {
            if !pricing_group_enabled(price, &credential.group_name) {
                continue;
            }
            if let Some(allowed) = &allowed {
                if !allowed.contains(price.model_name.as_str()) {
                    continue;
                }
            }
            seeds.push(RouteSeed {
                credential_id: credential.id,
                model_name: price.model_name.clone(),
            });
        }
    }

    storage.rebuild_routes(provider_id, seeds).await?;
    Ok(())
}

fn pricing_group_enabled(price: &PricingRow, group_name: &str) -> bool {
    match price.enable_groups.as_array() {
        None => true,
        Some(groups) if groups.is_empty() => true,
        Some(groups) => groups.iter().any(|g| g.as_str() == Some(group_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing_row(enable_groups: serde_json::Value) -> PricingRow {
        PricingRow {
            id: 1,
            provider_id: 1,
            model_name: "gpt-4".to_string(),
            quota_type: 0,
            model_ratio: 1.0,
            completion_ratio: 1.0,
            model_price: 0.0,
            enable_groups,
        }
    }

    #[test]
    fn group_match_respects_enable_groups() {
        let row = pricing_row(serde_json::json!(["default", "vip"]));
        assert!(pricing_group_enabled(&row, "vip"));
        assert!(!pricing_group_enabled(&row, "other"));
    }

    #[test]
    fn empty_enable_groups_allows_every_group() {
        let row = pricing_row(serde_json::json!([]));
        assert!(pricing_group_enabled(&row, "anything"));
    }

    #[test]
    fn key_only_token_is_never_rate_limited_by_quota() {
        let upsert = token_to_upsert(UpstreamToken {
            id: 1,
            key: "sk-test".to_string(),
            name: String::new(),
            status: 1,
            group_name: "default".to_string(),
            remain_quota: 0,
            unlimited_quota: true,
            model_limits_enabled: false,
            model_limits: String::new(),
        });
        assert!(upsert.remain_quota.is_none());
        assert!(upsert.model_limits.is_empty());
    }
}
