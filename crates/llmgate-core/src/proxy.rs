//! Transparent request proxy (§4.H). One pooled `wreq::Client` rewrites a
//! client request into an upstream request with no gateway fingerprint,
//! forwards it byte-transparently (including SSE), extracts usage/cost from
//! the response, and records an observation. Grounded on
//! `original_source/service/proxy.go` for the header/usage rules and on
//! `upstream_client/mod.rs` for the pooled-client/streaming idiom.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;
use wreq::Proxy;

use llmgate_routing::headers::{header_get, header_set};
use llmgate_routing::Headers;
use llmgate_storage::{NewObservation, Storage};
use llmgate_upstream::looks_like_challenge;

use crate::error::ClassifiedError;
use crate::usage::{self, UsageExtraction};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 20;

const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;
const MAX_ERROR_BODY_BYTES: usize = 20_000;
const MAX_LOG_SNIPPET_BYTES: usize = 1_200;
const MAX_ERROR_SSE_LINES: usize = 5;

/// Headers copied verbatim from the client request (§4.H step 1). Everything
/// else — including `X-Forwarded-*`/`Via`/`Forwarded` — is dropped simply by
/// not being in this list.
const COPY_HEADERS: &[&str] = &[
    "content-type",
    "accept",
    "accept-encoding",
    "accept-language",
    "user-agent",
    "anthropic-beta",
];

/// Response headers never forwarded back to the client (§4.H).
const DROP_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection"];

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub base_url: String,
    pub path: String,
    pub query: Option<String>,
    pub in_headers: Headers,
    pub body: Bytes,
    pub credential_secret: String,
    /// Raw per-token ratios for the cost-estimate fallback when the
    /// upstream response carries no `cost`/`total_cost` (§4.H).
    pub model_ratio: f64,
    pub completion_ratio: f64,
}

/// Everything the eventual observation row needs, owned so it can move into
/// a `tokio::spawn`'d streaming task (§4.B, §5 "issued asynchronously").
#[derive(Debug, Clone)]
pub struct ObservationContext {
    pub request_id: String,
    pub user_id: Option<i64>,
    pub agg_token_id: Option<i64>,
    pub provider_id: i64,
    pub credential_id: i64,
    pub client_ip: Option<String>,
}

pub enum ProxyOutcome {
    Full {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
    Stream {
        status: u16,
        headers: Headers,
        rx: mpsc::Receiver<Bytes>,
    },
}

impl ProxyOutcome {
    pub fn status(&self) -> u16 {
        match self {
            ProxyOutcome::Full { status, .. } => *status,
            ProxyOutcome::Stream { status, .. } => *status,
        }
    }
}

pub struct ProxyEngine {
    client: ArcSwap<wreq::Client>,
    storage: Arc<dyn Storage>,
}

impl ProxyEngine {
    pub fn new(http_proxy: Option<&str>, https_proxy: Option<&str>, storage: Arc<dyn Storage>) -> Result<Self, wreq::Error> {
        let client = build_client(http_proxy, https_proxy)?;
        Ok(Self {
            client: ArcSwap::from_pointee(client),
            storage,
        })
    }

    /// Rebuilds the outbound client from an admin options write (§6); takes
    /// effect for the next dispatch, in-flight requests keep their client.
    pub fn set_proxies(&self, http_proxy: Option<&str>, https_proxy: Option<&str>) -> Result<(), wreq::Error> {
        let client = build_client(http_proxy, https_proxy)?;
        self.client.store(Arc::new(client));
        Ok(())
    }

    /// Sends one attempt upstream. Returns `Err` only for a genuine
    /// transport failure (connect/timeout/DNS/TLS) or a sniffed Cloudflare
    /// challenge — both retryable (§9) — and always records its own
    /// observation row before returning, win or lose (S5).
    pub async fn dispatch(
        &self,
        req: OutboundRequest,
        obs: ObservationContext,
    ) -> Result<ProxyOutcome, ClassifiedError> {
        let started = Instant::now();
        let url = build_url(&req.base_url, &req.path, req.query.as_deref());
        let method = req.method.parse::<wreq::Method>().unwrap_or(wreq::Method::POST);
        let outbound_headers = build_outbound_headers(&req.in_headers, &req.credential_secret, &req.path);

        let client = self.client.load();
        let mut builder = client.request(method, &url);
        for (name, value) in &outbound_headers {
            builder = builder.header(name, value);
        }
        builder = builder.body(req.body.clone());

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                let message = format!(
                    "upstream dispatch error: {err}; request body: {}",
                    request_body_snippet(&req)
                );
                let truncated = truncate(&message, MAX_ERROR_BODY_BYTES);
                warn!(request_id = %obs.request_id, error = %truncate(&message, MAX_LOG_SNIPPET_BYTES), "dispatch failed");
                spawn_failed_observation(
                    self.storage.clone(),
                    obs,
                    req.model_ratio.max(0.0).to_string(),
                    started.elapsed().as_millis() as i64,
                    truncated.clone(),
                );
                return Err(ClassifiedError::transport(truncated));
            }
        };

        let status = response.status().as_u16();
        let raw_headers = response.headers().clone();
        let content_type = raw_headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let is_stream = content_type.contains("text/event-stream");
        let response_headers = filter_response_headers(&raw_headers);

        if is_stream {
            let (tx, rx) = mpsc::channel::<Bytes>(16);
            let storage = self.storage.clone();
            let model_ratio = req.model_ratio;
            let completion_ratio = req.completion_ratio;
            let requested_model = outbound_model_name(&req);
            tokio::spawn(async move {
                stream_sse(
                    response,
                    tx,
                    storage,
                    obs,
                    started,
                    requested_model,
                    model_ratio,
                    completion_ratio,
                    status,
                )
                .await;
            });
            return Ok(ProxyOutcome::Stream {
                status,
                headers: response_headers,
                rx,
            });
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                let message = format!("upstream read error: {err}");
                let truncated = truncate(&message, MAX_ERROR_BODY_BYTES);
                warn!(request_id = %obs.request_id, error = %truncate(&message, MAX_LOG_SNIPPET_BYTES), "upstream body read failed");
                spawn_failed_observation(
                    self.storage.clone(),
                    obs,
                    outbound_model_name(&req),
                    started.elapsed().as_millis() as i64,
                    truncated.clone(),
                );
                return Err(ClassifiedError::transport(truncated));
            }
        };
        let body_text = String::from_utf8_lossy(&body);

        if looks_like_challenge(status, &raw_headers, &body_text) {
            let message = "upstream is behind a Cloudflare challenge".to_string();
            warn!(request_id = %obs.request_id, status, "cloudflare challenge detected");
            spawn_failed_observation(
                self.storage.clone(),
                obs,
                outbound_model_name(&req),
                started.elapsed().as_millis() as i64,
                message.clone(),
            );
            return Err(ClassifiedError::new(message, 502, true));
        }

        let mut usage_acc = serde_json::from_slice::<serde_json::Value>(&body)
            .map(|payload| usage::extract(&payload, req.model_ratio, req.completion_ratio))
            .unwrap_or_default();
        if usage_acc.model_name.is_none() {
            usage_acc.model_name = Some(outbound_model_name(&req));
        }

        let success = status < 400;
        let error_message = if success {
            None
        } else {
            Some(truncate(&body_text, MAX_ERROR_BODY_BYTES))
        };
        if !success {
            warn!(request_id = %obs.request_id, status, body = %truncate(&body_text, MAX_LOG_SNIPPET_BYTES).replace('\n', " "), "upstream returned an error status");
        }

        let row = build_observation(&obs, &usage_acc, started.elapsed().as_millis() as i64, None, false, success, error_message);
        spawn_observation(self.storage.clone(), row);

        Ok(ProxyOutcome::Full {
            status,
            headers: response_headers,
            body,
        })
    }
}

fn build_client(http_proxy: Option<&str>, https_proxy: Option<&str>) -> Result<wreq::Client, wreq::Error> {
    let mut builder = wreq::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST);
    if let Some(proxy) = http_proxy.filter(|p| !p.trim().is_empty()) {
        builder = builder.proxy(Proxy::http(proxy)?);
    }
    if let Some(proxy) = https_proxy.filter(|p| !p.trim().is_empty()) {
        builder = builder.proxy(Proxy::https(proxy)?);
    }
    builder.build()
}

fn outbound_model_name(req: &OutboundRequest) -> String {
    serde_json::from_slice::<serde_json::Value>(&req.body)
        .ok()
        .and_then(|v| usage::extract_model_name(&v))
        .unwrap_or_default()
}

/// When `Content-Type` is `application/json`, the body is included in
/// error-message construction verbatim; otherwise a placeholder marker
/// avoids embedding arbitrary binary payloads (§4.H).
fn request_body_snippet(req: &OutboundRequest) -> String {
    let content_type = header_get(&req.in_headers, "content-type").unwrap_or("");
    if content_type.contains("application/json") {
        String::from_utf8_lossy(&req.body).into_owned()
    } else {
        "(non-json omitted)".to_string()
    }
}

fn build_outbound_headers(in_headers: &Headers, credential_secret: &str, path: &str) -> Headers {
    let mut out = Headers::new();
    for name in COPY_HEADERS {
        if let Some(value) = header_get(in_headers, name) {
            header_set(&mut out, *name, value.to_string());
        }
    }

    header_set(&mut out, "authorization", format!("Bearer {credential_secret}"));

    if path.contains("/v1/messages") {
        header_set(&mut out, "x-api-key", credential_secret.to_string());
        if let Some(version) = header_get(in_headers, "anthropic-version") {
            header_set(&mut out, "anthropic-version", version.to_string());
        }
    }

    if path.starts_with("/v1beta/") {
        header_set(&mut out, "x-goog-api-key", credential_secret.to_string());
    }

    out
}

fn filter_response_headers(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            if DROP_RESPONSE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                return None;
            }
            value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

fn build_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    let mut url = format!("{base}{path}");
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[allow(clippy::too_many_arguments)]
async fn stream_sse(
    response: wreq::Response,
    tx: mpsc::Sender<Bytes>,
    storage: Arc<dyn Storage>,
    obs: ObservationContext,
    started: Instant,
    requested_model: String,
    model_ratio: f64,
    completion_ratio: f64,
    status: u16,
) {
    let mut stream = response.bytes_stream();
    let mut buf = BytesMut::new();
    let mut usage_acc = UsageExtraction::default();
    let mut first_token_ms: Option<i64> = None;
    let mut error_lines: Vec<String> = Vec::new();
    let mut scanner_error: Option<String> = None;

    'outer: loop {
        let chunk = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                scanner_error = Some(append_note(scanner_error, &format!("stream error: {err}")));
                break;
            }
            None => break,
        };
        buf.extend_from_slice(&chunk);

        loop {
            let newline_at = buf.iter().position(|b| *b == b'\n');
            let Some(newline_at) = newline_at else {
                if buf.len() > MAX_SSE_LINE_BYTES {
                    let line = buf.split_to(buf.len()).freeze();
                    process_sse_line(
                        &line,
                        &mut usage_acc,
                        &mut first_token_ms,
                        started,
                        status,
                        &mut error_lines,
                    );
                    scanner_error = Some(append_note(scanner_error, "line exceeded 1 MiB buffer"));
                    if tx.send(append_newline(&line)).await.is_err() {
                        break 'outer;
                    }
                }
                break;
            };
            let line = buf.split_to(newline_at).freeze();
            let _ = buf.split_to(1);

            process_sse_line(
                &line,
                &mut usage_acc,
                &mut first_token_ms,
                started,
                status,
                &mut error_lines,
            );

            if tx.send(append_newline(&line)).await.is_err() {
                break 'outer;
            }
        }
    }

    let mut error_message = if status >= 400 && !error_lines.is_empty() {
        Some(truncate(&error_lines.join("\n"), MAX_ERROR_BODY_BYTES))
    } else {
        None
    };
    if let Some(note) = scanner_error {
        error_message = Some(match error_message {
            Some(existing) => format!("{existing}; {note}"),
            None => note,
        });
    }

    if usage_acc.model_name.is_none() {
        usage_acc.model_name = Some(requested_model);
    }
    let _ = (model_ratio, completion_ratio);

    let row = build_observation(
        &obs,
        &usage_acc,
        started.elapsed().as_millis() as i64,
        first_token_ms,
        true,
        status < 400,
        error_message,
    );
    spawn_observation(storage, row);
}

fn process_sse_line(
    line: &Bytes,
    usage_acc: &mut UsageExtraction,
    first_token_ms: &mut Option<i64>,
    started: Instant,
    status: u16,
    error_lines: &mut Vec<String>,
) {
    if status >= 400 {
        if error_lines.len() < MAX_ERROR_SSE_LINES {
            error_lines.push(String::from_utf8_lossy(line).into_owned());
        }
        return;
    }

    let text = String::from_utf8_lossy(line);
    let Some(data) = text.strip_prefix("data:") else {
        return;
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return;
    }
    let Ok(payload) = serde_json::from_str::<serde_json::Value>(data) else {
        return;
    };
    if first_token_ms.is_none() {
        *first_token_ms = Some(started.elapsed().as_millis() as i64);
    }
    let extracted = usage::extract(&payload, 0.0, 0.0);
    usage_acc.merge_max(&extracted);
}

fn append_newline(line: &Bytes) -> Bytes {
    let mut out = BytesMut::with_capacity(line.len() + 1);
    out.extend_from_slice(line);
    out.extend_from_slice(b"\n");
    out.freeze()
}

fn append_note(existing: Option<String>, note: &str) -> String {
    match existing {
        Some(existing) => format!("{existing}; {note}"),
        None => note.to_string(),
    }
}

fn build_observation(
    obs: &ObservationContext,
    usage: &UsageExtraction,
    response_time_ms: i64,
    first_token_ms: Option<i64>,
    is_stream: bool,
    success: bool,
    error_message: Option<String>,
) -> NewObservation {
    NewObservation {
        request_id: obs.request_id.clone(),
        user_id: obs.user_id,
        agg_token_id: obs.agg_token_id,
        provider_id: Some(obs.provider_id),
        credential_id: Some(obs.credential_id),
        model_name: usage.model_name.clone().unwrap_or_default(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        cache_tokens: usage.cache_tokens,
        cache_tokens_5m: usage.cache_tokens_5m,
        cache_tokens_1h: usage.cache_tokens_1h,
        response_time_ms,
        first_token_ms,
        is_stream,
        cost_usd: usage.cost_usd.unwrap_or(0.0),
        status: if success { 1 } else { 0 },
        error_message,
        client_ip: obs.client_ip.clone(),
    }
}

fn spawn_observation(storage: Arc<dyn Storage>, row: NewObservation) {
    tokio::spawn(async move {
        if let Err(err) = storage.insert_observation(row).await {
            warn!(error = %err, "observation write failed");
        }
    });
}

fn spawn_failed_observation(
    storage: Arc<dyn Storage>,
    obs: ObservationContext,
    model_name: String,
    response_time_ms: i64,
    error_message: String,
) {
    let row = NewObservation {
        request_id: obs.request_id,
        user_id: obs.user_id,
        agg_token_id: obs.agg_token_id,
        provider_id: Some(obs.provider_id),
        credential_id: Some(obs.credential_id),
        model_name,
        response_time_ms,
        status: 0,
        error_message: Some(error_message),
        client_ip: obs.client_ip,
        ..Default::default()
    };
    spawn_observation(storage, row);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_only_allowlisted_headers_and_injects_bearer() {
        let mut in_headers = Headers::new();
        header_set(&mut in_headers, "Content-Type", "application/json");
        header_set(&mut in_headers, "X-Forwarded-For", "1.2.3.4");
        header_set(&mut in_headers, "Cookie", "session=abc");

        let out = build_outbound_headers(&in_headers, "sk-secret", "/v1/chat/completions");

        assert_eq!(header_get(&out, "content-type"), Some("application/json"));
        assert_eq!(header_get(&out, "authorization"), Some("Bearer sk-secret"));
        assert_eq!(header_get(&out, "x-forwarded-for"), None);
        assert_eq!(header_get(&out, "cookie"), None);
        assert_eq!(header_get(&out, "x-api-key"), None);
    }

    #[test]
    fn anthropic_path_injects_x_api_key_and_passes_through_version() {
        let mut in_headers = Headers::new();
        header_set(&mut in_headers, "anthropic-version", "2023-06-01");

        let out = build_outbound_headers(&in_headers, "sk-secret", "/v1/messages");

        assert_eq!(header_get(&out, "x-api-key"), Some("sk-secret"));
        assert_eq!(header_get(&out, "anthropic-version"), Some("2023-06-01"));
    }

    #[test]
    fn gemini_path_injects_goog_api_key() {
        let in_headers = Headers::new();
        let out = build_outbound_headers(&in_headers, "sk-secret", "/v1beta/models/gemini-pro:generateContent");
        assert_eq!(header_get(&out, "x-goog-api-key"), Some("sk-secret"));
    }

    #[test]
    fn drops_hop_by_hop_response_headers() {
        let mut map = wreq::header::HeaderMap::new();
        map.insert("transfer-encoding", "chunked".parse().unwrap());
        map.insert("connection", "keep-alive".parse().unwrap());
        map.insert("content-type", "application/json".parse().unwrap());
        let out = filter_response_headers(&map);
        assert!(header_get(&out, "transfer-encoding").is_none());
        assert!(header_get(&out, "connection").is_none());
        assert_eq!(header_get(&out, "content-type"), Some("application/json"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo";
        let truncated = truncate(s, 2);
        assert!(truncated.len() <= 2);
    }
}
