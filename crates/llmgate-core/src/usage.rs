//! Usage extraction (§4.H): the same algorithm runs over a non-streaming
//! JSON body and over each SSE `data: …` payload. Field names are vendor-
//! agnostic by construction — the gateway never learns which dialect a
//! response came from, it just looks for every name any dialect might use.

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct UsageExtraction {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cache_tokens: i64,
    pub cache_tokens_5m: i64,
    pub cache_tokens_1h: i64,
    pub cost_usd: Option<f64>,
    pub model_name: Option<String>,
}

impl UsageExtraction {
    /// Keeps a running maximum of every counter and the last-seen model
    /// name, as SSE payloads accumulate (§4.H streaming rule).
    pub fn merge_max(&mut self, other: &UsageExtraction) {
        self.prompt_tokens = self.prompt_tokens.max(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.max(other.completion_tokens);
        self.cache_tokens = self.cache_tokens.max(other.cache_tokens);
        self.cache_tokens_5m = self.cache_tokens_5m.max(other.cache_tokens_5m);
        self.cache_tokens_1h = self.cache_tokens_1h.max(other.cache_tokens_1h);
        if let Some(cost) = other.cost_usd {
            self.cost_usd = Some(self.cost_usd.unwrap_or(0.0).max(cost));
        }
        if other.model_name.is_some() {
            self.model_name = other.model_name.clone();
        }
    }
}

/// Extracts usage from one JSON payload (a full response body, or one SSE
/// `data:` line already stripped of its prefix and `[DONE]`-filtered).
///
/// `model_ratio`/`completion_ratio` back the cost estimate used when the
/// payload carries no `cost`/`total_cost` field of its own.
pub fn extract(payload: &Value, model_ratio: f64, completion_ratio: f64) -> UsageExtraction {
    let usage = usage_object(payload);

    let prompt_tokens = usage
        .and_then(|u| first_i64(u, &["prompt_tokens", "input_tokens"]))
        .unwrap_or(0);
    let completion_tokens = usage
        .and_then(|u| first_i64(u, &["completion_tokens", "output_tokens"]))
        .unwrap_or(0);

    let cache_tokens = usage.map(cache_read_tokens).unwrap_or(0);
    let (cache_creation_total, cache_5m, cache_1h) = usage
        .map(cache_creation_tokens)
        .unwrap_or((0, 0, 0));

    let cost_usd = usage.and_then(|u| first_f64(u, &["cost", "total_cost"])).or_else(|| {
        if prompt_tokens == 0 && completion_tokens == 0 {
            None
        } else {
            Some(estimate_cost(prompt_tokens, completion_tokens, model_ratio, completion_ratio))
        }
    });

    UsageExtraction {
        prompt_tokens,
        completion_tokens,
        cache_tokens: cache_tokens + cache_creation_total,
        cache_tokens_5m: cache_5m,
        cache_tokens_1h: cache_1h,
        cost_usd,
        model_name: extract_model_name(payload),
    }
}

/// `cost | total_cost` absent: `prompt·model_ratio/500000 +
/// completion·model_ratio·completion_ratio/500000`, non-positive
/// `completion_ratio` treated as 1 (§4.H).
fn estimate_cost(prompt_tokens: i64, completion_tokens: i64, model_ratio: f64, completion_ratio: f64) -> f64 {
    let completion_ratio = if completion_ratio > 0.0 { completion_ratio } else { 1.0 };
    (prompt_tokens as f64) * model_ratio / 500_000.0
        + (completion_tokens as f64) * model_ratio * completion_ratio / 500_000.0
}

/// `model` at root, falling back to `message.model` (§4.H). The
/// caller-provided original is the final fallback, applied by the caller —
/// this only reports what the payload itself says.
pub fn extract_model_name(payload: &Value) -> Option<String> {
    payload
        .get("model")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/message/model").and_then(Value::as_str))
        .map(str::to_string)
}

fn usage_object(payload: &Value) -> Option<&Value> {
    payload
        .get("usage")
        .or_else(|| payload.pointer("/message/usage"))
        .filter(|v| v.is_object())
}

fn cache_read_tokens(usage: &Value) -> i64 {
    max_i64(
        usage,
        &[
            &["cached_tokens"],
            &["prompt_tokens_details", "cached_tokens"],
            &["input_tokens_details", "cached_tokens"],
            &["prompt_cache_hit_tokens"],
            &["cache_read_input_tokens"],
        ],
    )
}

/// Returns `(total, ephemeral_5m, ephemeral_1h)`. The total is the max of
/// every creation-total field, floored by the sum of the two ephemeral
/// buckets (§4.H: "the total is also floored by the sum of the two
/// ephemeral buckets").
fn cache_creation_tokens(usage: &Value) -> (i64, i64, i64) {
    let ephemeral_5m = max_i64(
        usage,
        &[
            &["cache_creation", "ephemeral_5m_input_tokens"],
            &["cache_creation_5m_tokens"],
        ],
    );
    let ephemeral_1h = max_i64(
        usage,
        &[
            &["cache_creation", "ephemeral_1h_input_tokens"],
            &["cache_creation_1h_tokens"],
        ],
    );

    let total = max_i64(
        usage,
        &[
            &["cache_creation_tokens"],
            &["cache_creation_input_tokens"],
            &["prompt_tokens_details", "cached_creation_tokens"],
        ],
    );
    let ephemeral_sum = ephemeral_5m + ephemeral_1h;
    (total.max(ephemeral_sum), ephemeral_5m, ephemeral_1h)
}

fn first_i64(value: &Value, paths: &[&str]) -> Option<i64> {
    paths.iter().find_map(|key| value.get(key).and_then(Value::as_i64))
}

fn first_f64(value: &Value, paths: &[&str]) -> Option<f64> {
    paths.iter().find_map(|key| value.get(key).and_then(Value::as_f64))
}

fn max_i64(value: &Value, paths: &[&[&str]]) -> i64 {
    paths
        .iter()
        .filter_map(|path| dotted_i64(value, path))
        .max()
        .unwrap_or(0)
}

fn dotted_i64(value: &Value, path: &[&str]) -> Option<i64> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    current.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_prompt_and_completion_with_fallback_names() {
        let payload = json!({"usage": {"input_tokens": 10, "output_tokens": 20}});
        let usage = extract(&payload, 2.0, 1.0);
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 20);
    }

    #[test]
    fn reads_anthropic_nested_usage_under_message() {
        let payload = json!({"type": "message_start", "message": {"model": "claude-3", "usage": {"input_tokens": 5, "output_tokens": 0}}});
        let usage = extract(&payload, 1.0, 1.0);
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.model_name.as_deref(), Some("claude-3"));
    }

    #[test]
    fn cache_read_takes_max_across_dialects() {
        let payload = json!({"usage": {
            "prompt_tokens": 100,
            "completion_tokens": 10,
            "cached_tokens": 3,
            "prompt_tokens_details": {"cached_tokens": 40},
            "cache_read_input_tokens": 12
        }});
        let usage = extract(&payload, 1.0, 1.0);
        assert_eq!(usage.cache_tokens, 40);
    }

    #[test]
    fn cache_creation_total_is_floored_by_ephemeral_sum_and_folded_into_cache_tokens() {
        let payload = json!({"usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "cache_creation_tokens": 5,
            "cache_creation": {"ephemeral_5m_input_tokens": 30, "ephemeral_1h_input_tokens": 10}
        }});
        let usage = extract(&payload, 1.0, 1.0);
        assert_eq!(usage.cache_tokens_5m, 30);
        assert_eq!(usage.cache_tokens_1h, 10);
        // total floored to 40 (5m+1h), folded into cache_tokens since there's no
        // separate creation column in the observation schema (see DESIGN.md).
        assert_eq!(usage.cache_tokens, 40);
    }

    #[test]
    fn cost_falls_back_to_estimate_when_absent() {
        let payload = json!({"usage": {"prompt_tokens": 1000, "completion_tokens": 500}});
        let usage = extract(&payload, 10.0, 2.0);
        let expected = 1000.0 * 10.0 / 500_000.0 + 500.0 * 10.0 * 2.0 / 500_000.0;
        assert!((usage.cost_usd.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn explicit_cost_field_wins_over_estimate() {
        let payload = json!({"usage": {"prompt_tokens": 1000, "completion_tokens": 500, "total_cost": 0.01}});
        let usage = extract(&payload, 10.0, 2.0);
        assert_eq!(usage.cost_usd, Some(0.01));
    }

    #[test]
    fn merge_max_keeps_running_peak_and_last_model() {
        let mut acc = UsageExtraction::default();
        acc.merge_max(&UsageExtraction {
            prompt_tokens: 5,
            model_name: Some("gpt-4".to_string()),
            ..Default::default()
        });
        acc.merge_max(&UsageExtraction {
            prompt_tokens: 3,
            completion_tokens: 9,
            model_name: Some("gpt-4-turbo".to_string()),
            ..Default::default()
        });
        assert_eq!(acc.prompt_tokens, 5);
        assert_eq!(acc.completion_tokens, 9);
        assert_eq!(acc.model_name.as_deref(), Some("gpt-4-turbo"));
    }
}
