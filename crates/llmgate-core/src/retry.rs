//! Retry pipeline (§4.I). Walks the tiers produced by
//! `llmgate_routing::select::plan` in order; within a tier, candidates are
//! already in weighted-random exploration order. The first attempt that
//! either succeeds or fails non-retryably ends the request; a retryable
//! failure falls through to the next candidate. Grounded on
//! `original_source/controller/relay.go` `Relay`, generalized from its
//! fixed `maxRetry` loop to the full tier/candidate plan.

use bytes::Bytes;

use llmgate_common::wire::ApiErrorBody;
use llmgate_routing::select::{RouteAttempt, Tier};
use llmgate_routing::Headers;

use crate::proxy::{ObservationContext, OutboundRequest, ProxyEngine, ProxyOutcome};

pub struct RelayRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
    pub user_id: Option<i64>,
    pub agg_token_id: Option<i64>,
    pub client_ip: Option<String>,
    pub request_id: String,
}

pub enum RelayOutcome {
    Success(ProxyOutcome),
    Failed { status: u16, body: ApiErrorBody },
}

/// Upstream responses at or above this status are treated as transient
/// (§4.I, §9) when the classified error carries no explicit `retryable` flag
/// — i.e. when the failure came from a received HTTP response rather than a
/// transport error, which already sets its own classification.
const RETRYABLE_STATUS_THRESHOLD: u16 = 500;

pub async fn relay(
    engine: &ProxyEngine,
    tiers: &[Tier],
    requested_model: &str,
    req: &RelayRequest,
) -> RelayOutcome {
    if tiers.is_empty() {
        return RelayOutcome::Failed {
            status: 503,
            body: ApiErrorBody::service_unavailable(format!(
                "no available provider for model: {requested_model}"
            )),
        };
    }

    for tier in tiers {
        for attempt in tier {
            match dispatch_attempt(engine, attempt, req).await {
                Ok(outcome) => {
                    if outcome.status() >= RETRYABLE_STATUS_THRESHOLD {
                        continue;
                    }
                    return RelayOutcome::Success(outcome);
                }
                Err(classified) => {
                    if !classified.retryable {
                        return RelayOutcome::Failed {
                            status: classified.status_code,
                            body: ApiErrorBody::server_error(classified.message),
                        };
                    }
                    continue;
                }
            }
        }
    }

    RelayOutcome::Failed {
        status: 503,
        body: ApiErrorBody::service_unavailable(format!(
            "all providers failed for model: {requested_model}"
        )),
    }
}

async fn dispatch_attempt(
    engine: &ProxyEngine,
    attempt: &RouteAttempt,
    req: &RelayRequest,
) -> Result<ProxyOutcome, crate::error::ClassifiedError> {
    let outbound = OutboundRequest {
        method: req.method.clone(),
        base_url: attempt.base_url.clone(),
        path: req.path.clone(),
        query: req.query.clone(),
        in_headers: req.headers.clone(),
        body: req.body.clone(),
        credential_secret: attempt.secret.clone(),
        model_ratio: attempt.model_ratio,
        completion_ratio: attempt.completion_ratio,
    };
    let obs = ObservationContext {
        request_id: req.request_id.clone(),
        user_id: req.user_id,
        agg_token_id: req.agg_token_id,
        provider_id: attempt.provider_id,
        credential_id: attempt.credential_id,
        client_ip: req.client_ip.clone(),
    };
    engine.dispatch(outbound, obs).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_plan_yields_503_with_no_candidate_message() {
        let engine = ProxyEngine::new(None, None, std::sync::Arc::new(NullStorage)).unwrap();
        let req = RelayRequest {
            method: "POST".into(),
            path: "/v1/chat/completions".into(),
            query: None,
            headers: Headers::new(),
            body: Bytes::new(),
            user_id: None,
            agg_token_id: None,
            client_ip: None,
            request_id: "req-1".into(),
        };
        let outcome = relay(&engine, &[], "gpt-4o", &req).await;
        match outcome {
            RelayOutcome::Failed { status, body } => {
                assert_eq!(status, 503);
                assert!(body.error.message.contains("no available provider"));
            }
            RelayOutcome::Success(_) => panic!("expected failure"),
        }
    }

    struct NullStorage;

    #[async_trait::async_trait]
    impl llmgate_storage::Storage for NullStorage {
        async fn sync(&self) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn load_global_config(
            &self,
        ) -> llmgate_storage::StorageResult<Option<llmgate_storage::GlobalConfigRow>> {
            Ok(None)
        }
        async fn upsert_global_config(
            &self,
            _config: &llmgate_common::GlobalConfig,
        ) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn load_snapshot(&self) -> llmgate_storage::StorageResult<llmgate_storage::StorageSnapshot> {
            Ok(Default::default())
        }
        async fn providers_enabled(&self) -> llmgate_storage::StorageResult<Vec<llmgate_storage::ProviderRow>> {
            Ok(Vec::new())
        }
        async fn provider_by_id(
            &self,
            _provider_id: i64,
        ) -> llmgate_storage::StorageResult<Option<llmgate_storage::ProviderRow>> {
            Ok(None)
        }
        async fn insert_provider(&self, _row: &llmgate_storage::ProviderRow) -> llmgate_storage::StorageResult<i64> {
            Ok(0)
        }
        async fn record_sync_success(
            &self,
            _provider_id: i64,
            _balance_display: Option<&str>,
            _balance_usd: Option<f64>,
            _at: time::OffsetDateTime,
        ) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn record_checkin_result(
            &self,
            _provider_id: i64,
            _checkin_enabled: Option<bool>,
            _last_checkin_at: Option<time::OffsetDateTime>,
        ) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn providers_checkin_enabled(&self) -> llmgate_storage::StorageResult<Vec<llmgate_storage::ProviderRow>> {
            Ok(Vec::new())
        }
        async fn replace_pricing(
            &self,
            _provider_id: i64,
            _rows: Vec<llmgate_storage::PricingUpsert>,
            _at: time::OffsetDateTime,
        ) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn pricing_for_provider(&self, _provider_id: i64) -> llmgate_storage::StorageResult<Vec<llmgate_storage::PricingRow>> {
            Ok(Vec::new())
        }
        async fn reconcile_credentials(
            &self,
            _provider_id: i64,
            _rows: Vec<llmgate_storage::CredentialUpsert>,
        ) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn credentials_for_provider(&self, _provider_id: i64) -> llmgate_storage::StorageResult<Vec<llmgate_storage::CredentialRow>> {
            Ok(Vec::new())
        }
        async fn rebuild_routes(&self, _provider_id: i64, _seeds: Vec<llmgate_storage::RouteSeed>) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn routes_enabled(&self) -> llmgate_storage::StorageResult<Vec<llmgate_storage::RouteRow>> {
            Ok(Vec::new())
        }
        async fn set_route_overrides(
            &self,
            _route_id: i64,
            _enabled: Option<bool>,
            _priority: Option<i32>,
            _weight: Option<i32>,
        ) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn aggregated_tokens(&self) -> llmgate_storage::StorageResult<Vec<llmgate_storage::AggregatedTokenRow>> {
            Ok(Vec::new())
        }
        async fn insert_observation(&self, _obs: llmgate_storage::NewObservation) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
        async fn recent_cost(
            &self,
            _window_hours: i64,
        ) -> llmgate_storage::StorageResult<std::collections::HashMap<(i64, String), f64>> {
            Ok(Default::default())
        }
        async fn health_stats(
            &self,
            _window_hours: i64,
        ) -> llmgate_storage::StorageResult<std::collections::HashMap<(i64, String), llmgate_storage::HealthStats>> {
            Ok(Default::default())
        }
        async fn get_option(&self, _key: &str) -> llmgate_storage::StorageResult<Option<String>> {
            Ok(None)
        }
        async fn list_options(&self) -> llmgate_storage::StorageResult<Vec<(String, String)>> {
            Ok(Vec::new())
        }
        async fn set_option(&self, _key: &str, _value: &str) -> llmgate_storage::StorageResult<()> {
            Ok(())
        }
    }
}
