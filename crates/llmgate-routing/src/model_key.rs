//! Model name canonicalization (§4.A).
//!
//! Providers advertise the same logical model under slightly different
//! spellings (`claude-3-5-sonnet-20241022` vs `anthropic/claude-3.5-sonnet`
//! vs `[free] claude-3-5-sonnet`). Routing keys on a version-agnostic form so
//! a single incoming request can match routes from every provider that
//! serves "the same" model.

/// Strips up to 6 leading `[...]`/`(...)` bracket labels, drops a leading
/// `bigmodel/` vendor prefix, keeps only the last `/`-separated segment,
/// cuts at the first `:` (tag separator), and strips a trailing date or
/// `-latest` suffix.
pub fn normalize_model_name(raw: &str) -> String {
    let mut s = raw.trim();

    for _ in 0..6 {
        let trimmed = strip_one_bracket_label(s);
        if trimmed == s {
            break;
        }
        s = trimmed;
    }

    let s = s.trim();
    let s = s.strip_prefix("bigmodel/").unwrap_or(s);

    let s = match s.rsplit_once('/') {
        Some((_, last)) => last,
        None => s,
    };

    let s = match s.split_once(':') {
        Some((head, _)) => head,
        None => s,
    };

    strip_trailing_date_suffix(s.trim()).to_string()
}

const BRACKET_PAIRS: &[(char, char)] = &[
    ('[', ']'),
    ('(', ')'),
    ('{', '}'),
    ('<', '>'),
    ('【', '】'),
    ('（', '）'),
];

fn strip_one_bracket_label(s: &str) -> &str {
    let s = s.trim_start();
    for (open, close) in BRACKET_PAIRS.iter().copied() {
        if let Some(rest) = s.strip_prefix(open)
            && let Some(end) = rest.find(close)
        {
            return rest[end + close.len_utf8()..].trim_start();
        }
    }
    s
}

fn strip_trailing_date_suffix(s: &str) -> &str {
    if let Some(stripped) = s.strip_suffix("-latest") {
        return stripped;
    }
    // Trailing `-YYYYMMDD` or `-YYYY-MM-DD`.
    if let Some(idx) = s.rfind('-') {
        let tail = &s[idx + 1..];
        if tail.len() == 8 && tail.chars().all(|c| c.is_ascii_digit()) {
            return &s[..idx];
        }
    }
    let parts: Vec<&str> = s.rsplitn(4, '-').collect();
    if parts.len() == 4
        && parts[0].len() == 2
        && parts[1].len() == 2
        && parts[2].len() == 4
        && parts[0..3].iter().all(|p| p.chars().all(|c| c.is_ascii_digit()))
    {
        return parts[3];
    }
    s
}

/// Builds the version-agnostic routing key: lowercase, `.` folded to `-`,
/// split on runs of `[-_.]`, tokens sorted, rejoined with `-`. This is
/// deliberately lossy: `gpt-4-turbo` and `gpt-turbo-4` collide on purpose so
/// that reordered vendor spellings still route together.
pub fn version_agnostic_key(raw: &str) -> String {
    let normalized = normalize_model_name(raw).to_lowercase().replace('.', "-");
    let mut tokens: Vec<&str> = normalized
        .split(['-', '_', '.'])
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.join("-")
}

/// A provider's `model_alias_mapping`: requested-name → upstream-name, plus
/// the derived reverse lookup, both keyed on lowercase and on normalized key.
pub struct AliasTable {
    direct: std::collections::HashMap<String, String>,
    normalized: std::collections::HashMap<String, String>,
    reverse_direct: std::collections::HashMap<String, String>,
    reverse_normalized: std::collections::HashMap<String, String>,
}

impl AliasTable {
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut direct = std::collections::HashMap::new();
        let mut normalized = std::collections::HashMap::new();
        let mut reverse_direct = std::collections::HashMap::new();
        let mut reverse_normalized = std::collections::HashMap::new();
        if let Some(map) = value.as_object() {
            for (source, target) in map {
                let Some(target) = target.as_str() else {
                    continue;
                };
                let source_lower = source.to_lowercase();
                let target_lower = target.to_lowercase();
                direct.insert(source_lower.clone(), target_lower.clone());
                normalized.insert(normalize_model_name(source).to_lowercase(), target_lower.clone());
                reverse_direct.insert(target_lower.clone(), source_lower.clone());
                reverse_normalized.insert(normalize_model_name(target).to_lowercase(), source_lower);
            }
        }
        Self {
            direct,
            normalized,
            reverse_direct,
            reverse_normalized,
        }
    }

    pub fn empty() -> Self {
        Self::from_json(&serde_json::Value::Null)
    }

    fn resolve(&self, requested_lower: &str, requested_normalized: &str) -> Option<&str> {
        self.direct
            .get(requested_lower)
            .or_else(|| self.normalized.get(requested_normalized))
            .or_else(|| self.reverse_direct.get(requested_lower))
            .or_else(|| self.reverse_normalized.get(requested_normalized))
            .map(String::as_str)
    }
}

/// Implements §4.A's matching rule between a requested model name and a
/// route's `model_name`, given that route provider's alias table.
pub fn matches(requested: &str, route_model: &str, aliases: &AliasTable) -> bool {
    let requested_lower = requested.to_lowercase();
    let route_lower = route_model.to_lowercase();
    if requested_lower == route_lower {
        return true;
    }

    let requested_norm = normalize_model_name(requested).to_lowercase();
    let route_norm = normalize_model_name(route_model).to_lowercase();
    if requested_norm == route_norm {
        return true;
    }

    if version_agnostic_key(&requested_norm) == version_agnostic_key(&route_norm) {
        return true;
    }

    if let Some(resolved) = aliases.resolve(&requested_lower, &requested_norm) {
        let resolved_norm = normalize_model_name(resolved).to_lowercase();
        if resolved == route_lower
            || resolved_norm == route_norm
            || version_agnostic_key(&resolved_norm) == version_agnostic_key(&route_norm)
        {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bracket_labels() {
        assert_eq!(
            normalize_model_name("[free] [beta] claude-3-5-sonnet"),
            "claude-3-5-sonnet"
        );
    }

    #[test]
    fn drops_bigmodel_prefix_and_keeps_last_segment() {
        assert_eq!(
            normalize_model_name("bigmodel/anthropic/claude-3-5-sonnet"),
            "claude-3-5-sonnet"
        );
    }

    #[test]
    fn cuts_at_tag_separator() {
        assert_eq!(normalize_model_name("llama3:8b-instruct"), "llama3");
    }

    #[test]
    fn strips_trailing_date_and_latest() {
        assert_eq!(
            normalize_model_name("claude-3-5-sonnet-20241022"),
            "claude-3-5-sonnet"
        );
        assert_eq!(normalize_model_name("gpt-4o-latest"), "gpt-4o");
    }

    #[test]
    fn version_agnostic_key_ignores_token_order() {
        assert_eq!(
            version_agnostic_key("claude-3-5-sonnet-20241022"),
            version_agnostic_key("claude-sonnet-3-5")
        );
    }

    #[test]
    fn matches_via_normalized_key_and_alias() {
        let aliases = AliasTable::from_json(&serde_json::json!({
            "sonnet": "claude-3-5-sonnet-latest"
        }));
        assert!(matches(
            "Claude-3.5-Sonnet-20240620",
            "claude-3-5-sonnet",
            &AliasTable::empty()
        ));
        assert!(matches("sonnet", "claude-3-5-sonnet", &aliases));
    }
}
