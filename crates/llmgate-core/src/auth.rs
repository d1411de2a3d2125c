//! Aggregated-token authentication (§4.H relay handler, §6 external
//! interfaces). Grounded on `original_source/middleware/agg_token_auth.go`
//! (`AggTokenAuth`/`extractAggToken`) and `model/aggregated_token.go`
//! (`ValidateAggToken`/`IsModelAllowed`/`IsIPAllowed`).

use time::OffsetDateTime;

use llmgate_common::wire::ApiErrorBody;
use llmgate_routing::model_key::normalize_model_name;
use llmgate_routing::registry::{AggregatedTokenInfo, RegistryIndex};
use llmgate_routing::Headers;

/// The authenticated identity threaded from the relay handler into the
/// retry pipeline and, eventually, the observation row.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token: AggregatedTokenInfo,
}

#[derive(Debug, Clone)]
pub struct AuthFailure {
    pub status: u16,
    pub body: ApiErrorBody,
}

impl AuthFailure {
    fn new(status: u16, body: ApiErrorBody) -> Self {
        Self { status, body }
    }
}

const AGG_TOKEN_PREFIX: &str = "ag-";

/// Extracts the raw aggregated-token value from the first source present,
/// in strict precedence order: `Authorization` (Bearer/bearer), `x-api-key`
/// (Anthropic-compat), `x-goog-api-key` (Gemini-compat), then the `key`
/// query parameter. Each source has its `ag-` prefix stripped if present.
pub fn extract_token(headers: &Headers, query: Option<&str>) -> Option<String> {
    if let Some(auth) = llmgate_routing::headers::header_get(headers, "authorization") {
        let auth = auth.trim();
        if !auth.is_empty() {
            let stripped = auth
                .strip_prefix("Bearer ")
                .or_else(|| auth.strip_prefix("bearer "))
                .unwrap_or(auth);
            return Some(strip_agg_prefix(stripped));
        }
    }

    if let Some(api_key) = llmgate_routing::headers::header_get(headers, "x-api-key") {
        if !api_key.is_empty() {
            return Some(strip_agg_prefix(api_key));
        }
    }

    if let Some(goog_key) = llmgate_routing::headers::header_get(headers, "x-goog-api-key") {
        if !goog_key.is_empty() {
            return Some(strip_agg_prefix(goog_key));
        }
    }

    if let Some(query) = query {
        if let Some(key) = query_param(query, "key") {
            if !key.is_empty() {
                return Some(strip_agg_prefix(&key));
            }
        }
    }

    None
}

fn strip_agg_prefix(value: &str) -> String {
    value.strip_prefix(AGG_TOKEN_PREFIX).unwrap_or(value).to_string()
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == name {
            Some(urlencoding_decode(value))
        } else {
            None
        }
    })
}

/// Minimal `application/x-www-form-urlencoded` value decode (`+` → space,
/// `%XX` → byte); query keys the gateway reads are ASCII and never need
/// more than this.
fn urlencoding_decode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut bytes = value.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'+' => out.push(' '),
            b'%' => {
                let hi = bytes.next();
                let lo = bytes.next();
                match (hi.and_then(hex_digit), lo.and_then(hex_digit)) {
                    (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as char),
                    _ => out.push('%'),
                }
            }
            _ => out.push(b as char),
        }
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Looks up and validates the aggregated token named by `headers`/`query`:
/// present, enabled, and not expired (§6).
pub fn authenticate(
    registry: &RegistryIndex,
    headers: &Headers,
    query: Option<&str>,
) -> Result<AuthContext, AuthFailure> {
    let Some(key_value) = extract_token(headers, query) else {
        return Err(AuthFailure::new(401, ApiErrorBody::missing_token()));
    };

    let Some(token) = registry.aggregated_token(&key_value) else {
        return Err(AuthFailure::new(401, ApiErrorBody::invalid_api_key()));
    };

    if !token.enabled {
        return Err(AuthFailure::new(401, ApiErrorBody::invalid_api_key()));
    }

    if let Some(expired_at) = token.expired_at {
        if expired_at < OffsetDateTime::now_utc() {
            return Err(AuthFailure::new(401, ApiErrorBody::invalid_api_key()));
        }
    }

    Ok(AuthContext { token: token.clone() })
}

/// Empty allowlist means every client IP is allowed (§6).
pub fn check_ip_allowed(token: &AggregatedTokenInfo, client_ip: Option<&str>) -> Result<(), AuthFailure> {
    if token.allow_ips.is_empty() {
        return Ok(());
    }
    let allowed = client_ip.is_some_and(|ip| token.allow_ips.iter().any(|entry| entry == ip));
    if allowed {
        Ok(())
    } else {
        Err(AuthFailure::new(403, ApiErrorBody::ip_not_allowed()))
    }
}

/// Match on lowercase exact or normalized key (§4.I).
pub fn check_model_allowed(token: &AggregatedTokenInfo, model: &str) -> Result<(), AuthFailure> {
    if !token.model_limits_enabled || token.model_limits.is_empty() {
        return Ok(());
    }

    let requested = model.trim();
    if requested.is_empty() {
        return Err(AuthFailure::new(403, ApiErrorBody::model_not_allowed(model)));
    }
    let requested_lower = requested.to_lowercase();
    let requested_norm = normalize_model_name(requested).to_lowercase();

    let allowed = token.model_limits.iter().any(|limit| {
        let limit = limit.trim();
        if limit.is_empty() {
            return false;
        }
        limit.to_lowercase() == requested_lower || normalize_model_name(limit).to_lowercase() == requested_norm
    });

    if allowed {
        Ok(())
    } else {
        Err(AuthFailure::new(403, ApiErrorBody::model_not_allowed(model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_routing::headers::header_set;

    fn token(model_limits_enabled: bool, model_limits: &[&str]) -> AggregatedTokenInfo {
        AggregatedTokenInfo {
            id: 1,
            user_id: 1,
            enabled: true,
            model_limits_enabled,
            model_limits: model_limits.iter().map(|s| s.to_string()).collect(),
            allow_ips: Vec::new(),
            expired_at: None,
        }
    }

    #[test]
    fn authorization_bearer_strips_prefix_and_ag_marker() {
        let mut headers = Headers::new();
        header_set(&mut headers, "Authorization", "Bearer ag-abc123");
        assert_eq!(extract_token(&headers, None).as_deref(), Some("abc123"));
    }

    #[test]
    fn authorization_takes_precedence_over_x_api_key() {
        let mut headers = Headers::new();
        header_set(&mut headers, "authorization", "bearer ag-first");
        header_set(&mut headers, "x-api-key", "ag-second");
        assert_eq!(extract_token(&headers, None).as_deref(), Some("first"));
    }

    #[test]
    fn falls_back_to_x_api_key_then_x_goog_api_key_then_query() {
        let mut headers = Headers::new();
        header_set(&mut headers, "x-api-key", "ag-anthropic-style");
        assert_eq!(extract_token(&headers, None).as_deref(), Some("anthropic-style"));

        let mut headers = Headers::new();
        header_set(&mut headers, "x-goog-api-key", "ag-gemini-style");
        assert_eq!(extract_token(&headers, None).as_deref(), Some("gemini-style"));

        let headers = Headers::new();
        assert_eq!(
            extract_token(&headers, Some("key=ag-query-style&foo=bar")).as_deref(),
            Some("query-style")
        );
    }

    #[test]
    fn missing_every_source_returns_none() {
        assert_eq!(extract_token(&Headers::new(), None), None);
    }

    #[test]
    fn model_allowlist_disabled_allows_everything() {
        let t = token(false, &[]);
        assert!(check_model_allowed(&t, "anything").is_ok());
    }

    #[test]
    fn model_allowlist_matches_normalized_key() {
        let t = token(true, &["claude-3-5-sonnet"]);
        assert!(check_model_allowed(&t, "Claude-3.5-Sonnet-20240620").is_ok());
        assert!(check_model_allowed(&t, "gpt-4o").is_err());
    }

    #[test]
    fn ip_allowlist_empty_allows_all_else_exact_match() {
        let mut t = token(false, &[]);
        assert!(check_ip_allowed(&t, Some("1.2.3.4")).is_ok());
        t.allow_ips = vec!["1.2.3.4".to_string()];
        assert!(check_ip_allowed(&t, Some("1.2.3.4")).is_ok());
        assert!(check_ip_allowed(&t, Some("5.6.7.8")).is_err());
        assert!(check_ip_allowed(&t, None).is_err());
    }
}
