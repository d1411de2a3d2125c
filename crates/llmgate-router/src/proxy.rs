//! axum routes for the client-facing wire protocol (§6): a single
//! byte-transparent relay handler plus the small set of compatibility
//! endpoints (`/v1/models`, the billing stubs) the upstream clients expect
//! to exist. Grounded on `gproxy-router/src/proxy.rs` for the header/SSE
//! axum conversion idiom (hop-by-hop filtering, `Cache-Control`/
//! `X-Accel-Buffering` on SSE) and on `original_source/controller/relay.go`
//! for `Relay`/`ListModels`/`GetModel`/`BillingSubscription`/`BillingUsage`.
//! Unlike the teacher, there is no per-vendor-dialect route table — every
//! request lands on the same catch-all handler, since this gateway forwards
//! bytes rather than translating them.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use llmgate_core::proxy::ProxyOutcome;
use llmgate_core::retry::{relay, RelayOutcome, RelayRequest};
use llmgate_core::state::AppState;
use llmgate_core::{authenticate, check_ip_allowed, check_model_allowed};
use llmgate_routing::{header_get, Headers};

pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/models/{model}", get(get_model))
        .route("/dashboard/billing/subscription", get(billing_subscription))
        .route("/dashboard/billing/usage", get(billing_usage))
        .fallback(any(relay_handler))
        .with_state(state)
}

async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.registry.load();
    let models: Vec<_> = registry
        .distinct_models()
        .into_iter()
        .map(|id| serde_json::json!({ "id": id, "object": "model", "owned_by": "aggregated-gateway" }))
        .collect();
    Json(serde_json::json!({ "object": "list", "data": models }))
}

async fn get_model(State(state): State<Arc<AppState>>, Path(model): Path<String>) -> Response {
    let registry = state.registry.load();
    if registry.distinct_models().iter().any(|m| *m == model) {
        Json(serde_json::json!({ "id": model, "object": "model", "owned_by": "aggregated-gateway" }))
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": { "message": format!("model not found: {model}"), "type": "invalid_request_error" }
            })),
        )
            .into_response()
    }
}

async fn billing_subscription() -> impl IntoResponse {
    Json(serde_json::json!({
        "object": "billing_subscription",
        "has_payment_method": true,
        "hard_limit_usd": 999_999,
        "soft_limit_usd": 999_999,
        "system_hard_limit_usd": 999_999,
        "access_until": 4_102_444_800_i64,
    }))
}

async fn billing_usage() -> impl IntoResponse {
    Json(serde_json::json!({ "object": "list", "total_usage": 0 }))
}

async fn relay_handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let registry = state.registry.load();
    let in_headers = headers_to_vec(&headers);
    let query = uri.query().map(str::to_string);

    let auth = match authenticate(&registry, &in_headers, query.as_deref()) {
        Ok(ctx) => ctx,
        Err(failure) => return error_response(failure.status, &failure.body),
    };

    let client_ip = client_ip(&headers, connect_info);
    if let Err(failure) = check_ip_allowed(&auth.token, client_ip.as_deref()) {
        return error_response(failure.status, &failure.body);
    }

    let requested_model = extract_model_from_body(&body);
    if let Err(failure) = check_model_allowed(&auth.token, &requested_model) {
        return error_response(failure.status, &failure.body);
    }

    let tiers = llmgate_routing::select::plan(&requested_model, &registry, &state.routing_options.get());

    let req = RelayRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query,
        headers: in_headers,
        body,
        user_id: Some(auth.token.user_id),
        agg_token_id: Some(auth.token.id),
        client_ip,
        request_id: Uuid::new_v4().to_string(),
    };

    match relay(&state.proxy, &tiers, &requested_model, &req).await {
        RelayOutcome::Success(outcome) => outcome_to_response(outcome),
        RelayOutcome::Failed { status, body } => error_response(status, &body),
    }
}

fn extract_model_from_body(body: &Bytes) -> String {
    #[derive(serde::Deserialize)]
    struct ModelOnly {
        model: Option<String>,
    }
    serde_json::from_slice::<ModelOnly>(body)
        .ok()
        .and_then(|b| b.model)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn client_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(first) = s.split(',').next()
    {
        let trimmed = first.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn headers_to_vec(headers: &HeaderMap) -> Headers {
    let mut out: Headers = Vec::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.push((name.as_str().to_string(), v.to_string()));
        }
    }
    out
}

fn error_response(status: u16, body: &llmgate_common::wire::ApiErrorBody) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(body.clone())).into_response()
}

fn outcome_to_response(outcome: ProxyOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let (headers, body_kind) = match outcome {
        ProxyOutcome::Full { headers, body, .. } => (headers, BodyKind::Bytes(body)),
        ProxyOutcome::Stream { headers, rx, .. } => (headers, BodyKind::Stream(rx)),
    };

    let is_sse = has_sse_content_type(&headers);
    let mut builder = Response::builder().status(status);
    if let Some(h) = builder.headers_mut() {
        for (k, v) in &headers {
            if is_hop_by_hop_or_framing_header(k) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
                h.append(name, value);
            }
        }
        if is_sse {
            h.entry(header::CACHE_CONTROL).or_insert(HeaderValue::from_static("no-cache"));
            h.entry(HeaderName::from_static("x-accel-buffering")).or_insert(HeaderValue::from_static("no"));
        }
    }

    let body = match body_kind {
        BodyKind::Bytes(b) => Body::from(b),
        BodyKind::Stream(rx) => Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>)),
    };

    builder
        .body(body)
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response())
}

enum BodyKind {
    Bytes(Bytes),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

fn has_sse_content_type(headers: &Headers) -> bool {
    header_get(headers, "content-type")
        .map(|v| v.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}

fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_model_from_minimal_json_body() {
        let body = Bytes::from_static(br#"{"model":"gpt-4o","messages":[]}"#);
        assert_eq!(extract_model_from_body(&body), "gpt-4o");
    }

    #[test]
    fn missing_model_field_yields_unknown() {
        let body = Bytes::from_static(br#"{"messages":[]}"#);
        assert_eq!(extract_model_from_body(&body), "unknown");
    }

    #[test]
    fn non_json_body_yields_unknown() {
        let body = Bytes::from_static(b"not json");
        assert_eq!(extract_model_from_body(&body), "unknown");
    }

    #[test]
    fn drops_hop_by_hop_response_headers() {
        assert!(is_hop_by_hop_or_framing_header("Transfer-Encoding"));
        assert!(!is_hop_by_hop_or_framing_header("content-type"));
    }
}
