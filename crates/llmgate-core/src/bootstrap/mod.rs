//! CLI/env/DB config merge and process startup (§5). Grounded on
//! `gproxy-core/src/bootstrap/mod.rs`'s merge precedence (CLI > ENV > DB,
//! then persisted back) and DSN/admin-key handling, narrowed to this
//! design's `Storage` trait — there is no builtin-provider seed step here,
//! since providers arrive purely through admin writes, not a bundled
//! default catalogue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use llmgate_common::GlobalConfigPatch;
use llmgate_routing::options::SharedRoutingOptions;
use llmgate_storage::{SeaOrmStorage, Storage};

use crate::proxy::ProxyEngine;
use crate::state::AppState;

const DEFAULT_DB_FILE: &str = "llmgate.db";

#[derive(Parser, Debug, Default)]
#[command(name = "llmgate", about = "Aggregating gateway for LLM API providers")]
pub struct CliArgs {
    #[arg(long, env = "LLMGATE_DSN")]
    pub dsn: Option<String>,
    #[arg(long, env = "LLMGATE_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "LLMGATE_PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "LLMGATE_ADMIN_KEY")]
    pub admin_key: Option<String>,
    #[arg(long, env = "LLMGATE_PROXY")]
    pub proxy: Option<String>,
    #[arg(long, env = "LLMGATE_EVENT_REDACT_SENSITIVE")]
    pub event_redact_sensitive: Option<bool>,
    #[arg(long, env = "LLMGATE_DATA_DIR")]
    pub data_dir: Option<String>,
}

pub struct Bootstrap {
    pub storage: Arc<SeaOrmStorage>,
    pub state: Arc<AppState>,
    /// Printed once at startup when a fresh admin key was generated, since
    /// there is nowhere else for the operator to read it back from.
    pub generated_admin_key: Option<String>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = resolve_dsn(&args);
    if let Some(path) = sqlite_file_path_from_dsn(&dsn) {
        ensure_sqlite_parent_dir(&path)?;
    }

    let storage = Arc::new(SeaOrmStorage::connect(&dsn).await?);
    storage.sync().await?;

    let existing = storage.load_global_config().await?;
    let mut merged = existing
        .map(|row| GlobalConfigPatch::from(row.config))
        .unwrap_or_default();

    let mut generated_admin_key = None;
    let admin_key_hash = match args.admin_key.clone() {
        Some(key) => Some(hash_admin_key(&key)),
        None => {
            if merged.admin_key_hash.is_none() {
                let key = generate_admin_key();
                let hash = hash_admin_key(&key);
                generated_admin_key = Some(key);
                Some(hash)
            } else {
                None
            }
        }
    };

    merged.overlay(GlobalConfigPatch {
        host: args.host,
        port: args.port,
        admin_key_hash,
        proxy: args.proxy,
        dsn: Some(dsn),
        event_redact_sensitive: args.event_redact_sensitive,
    });

    let global = merged.into_config()?;
    storage.upsert_global_config(&global).await?;

    let routing_options = load_routing_options(storage.as_ref()).await?;

    let snapshot = storage.load_snapshot().await?;
    let recent_usage = storage.recent_cost(routing_options.get().cost_window_hours).await?;
    let health = storage.health_stats(routing_options.get().health_window_hours).await?;
    let index = llmgate_routing::registry::build(&snapshot, recent_usage, health);

    let opts = routing_options.get();
    let http_proxy = opts.http_proxy.as_deref().or(global.proxy.as_deref());
    let https_proxy = opts.https_proxy.as_deref().or(global.proxy.as_deref());
    let proxy = ProxyEngine::new(http_proxy, https_proxy, storage.clone())?;
    let state = Arc::new(AppState::new(global, index, routing_options, storage.clone(), proxy));

    Ok(Bootstrap {
        storage,
        state,
        generated_admin_key,
    })
}

async fn load_routing_options(storage: &dyn Storage) -> anyhow::Result<SharedRoutingOptions> {
    let mut options = llmgate_routing::options::RoutingOptions::default();
    for (key, value) in storage.list_options().await? {
        apply_option(&mut options, &key, &value);
    }
    options.validate()?;
    Ok(SharedRoutingOptions::new(options))
}

fn apply_option(options: &mut llmgate_routing::options::RoutingOptions, key: &str, value: &str) {
    match key {
        "health_adjustment_enabled" => {
            if let Ok(v) = value.parse() {
                options.health_adjustment_enabled = v;
            }
        }
        "health_window_hours" => {
            if let Ok(v) = value.parse() {
                options.health_window_hours = v;
            }
        }
        "cost_window_hours" => {
            if let Ok(v) = value.parse() {
                options.cost_window_hours = v;
            }
        }
        "alpha" => {
            if let Ok(v) = value.parse() {
                options.alpha = v;
            }
        }
        "beta" => {
            if let Ok(v) = value.parse() {
                options.beta = v;
            }
        }
        "min_multiplier" => {
            if let Ok(v) = value.parse() {
                options.min_multiplier = v;
            }
        }
        "max_multiplier" => {
            if let Ok(v) = value.parse() {
                options.max_multiplier = v;
            }
        }
        "min_samples" => {
            if let Ok(v) = value.parse() {
                options.min_samples = v;
            }
        }
        "base_factor" => {
            if let Ok(v) = value.parse() {
                options.base_factor = v;
            }
        }
        "value_factor" => {
            if let Ok(v) = value.parse() {
                options.value_factor = v;
            }
        }
        "http_proxy" => {
            options.http_proxy = Some(value.to_string()).filter(|v| !v.is_empty());
        }
        "https_proxy" => {
            options.https_proxy = Some(value.to_string()).filter(|v| !v.is_empty());
        }
        _ => {}
    }
}

fn resolve_dsn(args: &CliArgs) -> String {
    sanitize_optional_env_value(args.dsn.clone()).unwrap_or_else(|| default_dsn(args.data_dir.as_deref()))
}

fn default_dsn(data_dir: Option<&str>) -> String {
    match sanitize_optional_env_value(data_dir.map(str::to_string)) {
        Some(dir) => format!("sqlite://{dir}/{DEFAULT_DB_FILE}?mode=rwc"),
        None => format!("sqlite://{DEFAULT_DB_FILE}?mode=rwc"),
    }
}

/// Treats an empty string, or an unexpanded `${VAR}`-shaped placeholder, as
/// unset — matching shells that pass through a literal placeholder when the
/// referenced variable was never exported.
fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() || (trimmed.starts_with("${") && trimmed.ends_with('}')) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Extracts the filesystem path backing a `sqlite:` DSN, or `None` for
/// `:memory:` (nothing to create) or a non-sqlite DSN.
fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next().unwrap_or(rest);
    let path_part = path_part.strip_prefix("//").unwrap_or(path_part);
    if path_part.is_empty() || path_part == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path_part))
}

fn ensure_sqlite_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn hash_admin_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

fn generate_admin_key() -> String {
    uuid::Uuid::new_v4().to_string().replace('-', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://data/llmgate.db?mode=rwc").unwrap();
        assert_eq!(path, PathBuf::from("data/llmgate.db"));
    }

    #[test]
    fn sqlite_dsn_resolves_absolute_path() {
        let path = sqlite_file_path_from_dsn("sqlite:///var/lib/llmgate/llmgate.db").unwrap();
        assert_eq!(path, PathBuf::from("/var/lib/llmgate/llmgate.db"));
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
    }

    #[test]
    fn placeholder_env_value_is_treated_as_unset() {
        assert_eq!(sanitize_optional_env_value(Some("${LLMGATE_DSN}".to_string())), None);
        assert_eq!(sanitize_optional_env_value(Some("  ".to_string())), None);
        assert_eq!(
            sanitize_optional_env_value(Some("sqlite://x.db".to_string())),
            Some("sqlite://x.db".to_string())
        );
    }

    #[test]
    fn default_dsn_uses_data_dir_when_set() {
        assert_eq!(default_dsn(Some("/data")), "sqlite:///data/llmgate.db?mode=rwc");
        assert_eq!(default_dsn(None), "sqlite://llmgate.db?mode=rwc");
    }
}
