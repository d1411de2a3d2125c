//! Admin surface (§6): routing-options tuning and an outbound proxy test.
//! Grounded on `gproxy-router/src/admin.rs`'s `admin_auth`/`AdminState` shape
//! and `original_source/controller/option.go`'s `GetOptions`/`UpdateOption`/
//! `TestProxy` handlers, narrowed to the one options surface this design
//! carries — the teacher's full provider/credential/user CRUD has no
//! counterpart here (routes/providers/credentials only change through the
//! synchronizer, §4.G).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use llmgate_core::state::AppState;
use llmgate_routing::options::RoutingOptions;
use llmgate_storage::Storage;

#[derive(Clone)]
pub struct AdminState {
    pub app: Arc<AppState>,
}

pub fn admin_router(app: Arc<AppState>) -> Router {
    let state = AdminState { app };

    Router::new()
        .route("/health", get(health))
        .route("/admin/options", get(get_options).put(put_options))
        .route("/admin/options/test-proxy", post(test_proxy))
        .route("/admin/routes/{id}", patch(patch_route_overrides))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }
    let key = extract_admin_key(&headers, req.uri()).ok_or(StatusCode::UNAUTHORIZED)?;
    let expected_hash = state.app.global.load().admin_key_hash.clone();
    if blake3::hash(key.as_bytes()).to_hex().to_string() != expected_hash {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

/// Unlike the teacher's `admin_auth`, this hashes the supplied key before
/// comparing — `GlobalConfig` only ever stores `admin_key_hash`, never the
/// plaintext key, so there is nothing to compare against directly.
fn extract_admin_key(headers: &HeaderMap, uri: &axum::http::Uri) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }

    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(auth) = value.to_str()
    {
        let auth = auth.trim();
        let prefix = "Bearer ";
        if auth.len() > prefix.len() && auth[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = auth[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let query = uri.query()?;
    let parsed: std::collections::HashMap<String, String> = serde_urlencoded::from_str(query).ok()?;
    let key = parsed.get("admin_key")?.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "ok": true })))
}

#[derive(Serialize)]
struct ApiResult<T: Serialize> {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResult<T> {
    fn ok(data: T) -> Self {
        Self { success: true, message: String::new(), data: Some(data) }
    }

    fn err(message: impl Into<String>) -> ApiResult<()> {
        ApiResult { success: false, message: message.into(), data: None }
    }
}

async fn get_options(State(state): State<AdminState>) -> impl IntoResponse {
    Json(ApiResult::ok(state.app.routing_options.get()))
}

async fn put_options(
    State(state): State<AdminState>,
    Json(body): Json<RoutingOptions>,
) -> Response {
    if let Err(err) = body.validate() {
        return Json(ApiResult::<()>::err(err.to_string())).into_response();
    }

    let storage = state.app.storage.clone();
    for (key, value) in options_as_pairs(&body) {
        if let Err(err) = storage.set_option(key, &value).await {
            return Json(ApiResult::<()>::err(err.to_string())).into_response();
        }
    }
    if let Err(err) = state.app.proxy.set_proxies(body.http_proxy.as_deref(), body.https_proxy.as_deref()) {
        return Json(ApiResult::<()>::err(format!("failed to apply proxy settings: {err}"))).into_response();
    }
    state.app.routing_options.set(body);
    Json(ApiResult::ok(())).into_response()
}

fn options_as_pairs(options: &RoutingOptions) -> Vec<(&'static str, String)> {
    vec![
        ("health_adjustment_enabled", options.health_adjustment_enabled.to_string()),
        ("health_window_hours", options.health_window_hours.to_string()),
        ("cost_window_hours", options.cost_window_hours.to_string()),
        ("alpha", options.alpha.to_string()),
        ("beta", options.beta.to_string()),
        ("min_multiplier", options.min_multiplier.to_string()),
        ("max_multiplier", options.max_multiplier.to_string()),
        ("min_samples", options.min_samples.to_string()),
        ("base_factor", options.base_factor.to_string()),
        ("value_factor", options.value_factor.to_string()),
        ("http_proxy", options.http_proxy.clone().unwrap_or_default()),
        ("https_proxy", options.https_proxy.clone().unwrap_or_default()),
    ]
}

#[derive(Deserialize)]
struct RouteOverridePatch {
    enabled: Option<bool>,
    priority: Option<i32>,
    weight: Option<i32>,
}

/// §6's other route-table write path besides the synchronizer's per-provider
/// rebuild (§4.G): an admin patch of `enabled/priority/weight` for one route.
async fn patch_route_overrides(
    State(state): State<AdminState>,
    Path(route_id): Path<i64>,
    Json(body): Json<RouteOverridePatch>,
) -> Response {
    if let Err(err) = state
        .app
        .storage
        .set_route_overrides(route_id, body.enabled, body.priority, body.weight)
        .await
    {
        return Json(ApiResult::<()>::err(err.to_string())).into_response();
    }

    if let Err(err) = llmgate_core::rebuild_registry(&state.app).await {
        return Json(ApiResult::<()>::err(format!("route updated but registry rebuild failed: {err}"))).into_response();
    }

    Json(ApiResult::ok(())).into_response()
}

#[derive(Deserialize)]
struct TestProxyBody {
    proxy: String,
}

#[derive(Serialize)]
struct TestProxyData {
    status_code: u16,
}

async fn test_proxy(Json(body): Json<TestProxyBody>) -> Response {
    let proxy = body.proxy.trim();
    if proxy.is_empty() {
        return Json(ApiResult::<()>::err("proxy address must not be empty")).into_response();
    }

    let scheme = proxy.split("://").next().unwrap_or("");
    if !matches!(scheme, "http" | "https" | "socks5") {
        return Json(ApiResult::<()>::err("proxy scheme must be http, https, or socks5")).into_response();
    }

    let proxy_cfg = match wreq::Proxy::all(proxy) {
        Ok(p) => p,
        Err(err) => {
            return Json(ApiResult::<()>::err(format!("invalid proxy address: {err}"))).into_response()
        }
    };
    let client = match wreq::Client::builder().timeout(Duration::from_secs(10)).proxy(proxy_cfg).build() {
        Ok(c) => c,
        Err(err) => {
            return Json(ApiResult::<()>::err(format!("failed to build test client: {err}"))).into_response()
        }
    };

    match client.get("https://www.google.com").send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if (200..300).contains(&status) {
                Json(ApiResult::ok(TestProxyData { status_code: status })).into_response()
            } else {
                Json(ApiResult::<()>::err(format!("proxy returned status {status}"))).into_response()
            }
        }
        Err(err) => Json(ApiResult::<()>::err(format!("proxy connection failed: {err}"))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Uri};

    fn no_query() -> Uri {
        "/admin/options".parse().unwrap()
    }

    #[test]
    fn extracts_admin_key_from_x_admin_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", HeaderValue::from_static(" secret "));
        assert_eq!(extract_admin_key(&headers, &no_query()).as_deref(), Some("secret"));
    }

    #[test]
    fn extracts_admin_key_from_bearer_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(extract_admin_key(&headers, &no_query()).as_deref(), Some("tok"));
    }

    #[test]
    fn extracts_admin_key_from_query_param() {
        let headers = HeaderMap::new();
        let uri: Uri = "/admin/options?admin_key=qtok".parse().unwrap();
        assert_eq!(extract_admin_key(&headers, &uri).as_deref(), Some("qtok"));
    }

    #[test]
    fn missing_admin_key_anywhere_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_admin_key(&headers, &no_query()), None);
    }

    #[test]
    fn options_as_pairs_round_trips_every_field() {
        let options = RoutingOptions::default();
        let pairs = options_as_pairs(&options);
        assert_eq!(pairs.len(), 12);
        assert!(pairs.iter().any(|(k, _)| *k == "alpha"));
        assert!(pairs.iter().any(|(k, _)| *k == "http_proxy"));
    }
}
