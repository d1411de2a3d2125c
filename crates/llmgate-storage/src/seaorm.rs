use std::collections::HashMap;

use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter, QueryOrder, QuerySelect,
    Schema, TransactionTrait,
};
use time::OffsetDateTime;

use llmgate_common::GlobalConfig;

use crate::entities;
use crate::snapshot::{
    AggregatedTokenRow, CredentialRow, GlobalConfigRow, PricingRow, ProviderRow, RouteRow,
    StorageSnapshot,
};
use crate::storage::{
    CredentialUpsert, HealthStats, NewObservation, PricingUpsert, RouteSeed, Storage,
    StorageError, StorageResult,
};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn provider_row(m: entities::providers::Model) -> ProviderRow {
    ProviderRow {
        id: m.id,
        name: m.name,
        provider_type: m.provider_type,
        base_url: m.base_url,
        admin_token: m.admin_token,
        api_key: m.api_key,
        user_id: m.user_id,
        enabled: m.enabled,
        priority: m.priority,
        weight: m.weight,
        checkin_enabled: m.checkin_enabled,
        last_checkin_at: m.last_checkin_at,
        last_synced_at: m.last_synced_at,
        balance_display: m.balance_display,
        balance_usd: m.balance_usd,
        pricing_group_ratio: m.pricing_group_ratio,
        model_alias_mapping: m.model_alias_mapping,
    }
}

fn credential_row(m: entities::credentials::Model) -> CredentialRow {
    CredentialRow {
        id: m.id,
        provider_id: m.provider_id,
        upstream_token_id: m.upstream_token_id,
        secret: m.secret,
        group_name: m.group_name,
        enabled: m.enabled,
        remain_quota: m.remain_quota,
        unlimited_quota: m.unlimited_quota,
        model_limits: m.model_limits,
    }
}

fn pricing_row(m: entities::pricing::Model) -> PricingRow {
    PricingRow {
        id: m.id,
        provider_id: m.provider_id,
        model_name: m.model_name,
        quota_type: m.quota_type,
        model_ratio: m.model_ratio,
        completion_ratio: m.completion_ratio,
        model_price: m.model_price,
        enable_groups: m.enable_groups,
    }
}

fn route_row(m: entities::routes::Model) -> RouteRow {
    RouteRow {
        id: m.id,
        provider_id: m.provider_id,
        credential_id: m.credential_id,
        model_name: m.model_name,
        enabled: m.enabled,
        priority: m.priority,
        weight: m.weight,
    }
}

fn agg_token_row(m: entities::aggregated_tokens::Model) -> AggregatedTokenRow {
    AggregatedTokenRow {
        id: m.id,
        user_id: m.user_id,
        key_value: m.key_value,
        enabled: m.enabled,
        model_limits_enabled: m.model_limits_enabled,
        model_limits: m.model_limits,
        allow_ips: m.allow_ips,
        expired_at: m.expired_at,
    }
}

#[async_trait::async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .register(entities::Providers)
            .register(entities::Credentials)
            .register(entities::Pricing)
            .register(entities::Routes)
            .register(entities::AggregatedTokens)
            .register(entities::Observations)
            .register(entities::Options)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>> {
        use entities::global_config::Column;
        let row = entities::GlobalConfig::find()
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?;
        Ok(row.map(|m| GlobalConfigRow {
            id: m.id,
            config: GlobalConfig {
                host: m.host,
                port: u16::try_from(m.port).unwrap_or(8787),
                admin_key_hash: m.admin_key_hash,
                proxy: m.proxy,
                dsn: m.dsn,
                event_redact_sensitive: m.event_redact_sensitive.unwrap_or(true),
            },
            updated_at: m.updated_at,
        }))
    }

    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()> {
        use entities::global_config::ActiveModel as GlobalActive;

        let now = OffsetDateTime::now_utc();
        let id = 1_i64;
        let existing = entities::GlobalConfig::find_by_id(id).one(&self.db).await?;

        match existing {
            Some(model) => {
                let mut active: GlobalActive = model.into();
                active.host = ActiveValue::Set(config.host.clone());
                active.port = ActiveValue::Set(i32::from(config.port));
                active.admin_key_hash = ActiveValue::Set(config.admin_key_hash.clone());
                active.proxy = ActiveValue::Set(config.proxy.clone());
                active.dsn = ActiveValue::Set(config.dsn.clone());
                active.event_redact_sensitive =
                    ActiveValue::Set(Some(config.event_redact_sensitive));
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = GlobalActive {
                    id: ActiveValue::Set(id),
                    host: ActiveValue::Set(config.host.clone()),
                    port: ActiveValue::Set(i32::from(config.port)),
                    admin_key_hash: ActiveValue::Set(config.admin_key_hash.clone()),
                    proxy: ActiveValue::Set(config.proxy.clone()),
                    dsn: ActiveValue::Set(config.dsn.clone()),
                    event_redact_sensitive: ActiveValue::Set(Some(config.event_redact_sensitive)),
                    updated_at: ActiveValue::Set(now),
                };
                entities::GlobalConfig::insert(active).exec(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let global_config = self.load_global_config().await?;
        let providers = entities::Providers::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(provider_row)
            .collect();
        let credentials = entities::Credentials::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(credential_row)
            .collect();
        let pricing = entities::Pricing::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(pricing_row)
            .collect();
        let routes = entities::Routes::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(route_row)
            .collect();
        let aggregated_tokens = entities::AggregatedTokens::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(agg_token_row)
            .collect();
        let options = self.list_options().await?;

        Ok(StorageSnapshot {
            global_config,
            providers,
            credentials,
            pricing,
            routes,
            aggregated_tokens,
            options,
        })
    }

    async fn providers_enabled(&self) -> StorageResult<Vec<ProviderRow>> {
        use entities::providers::Column;
        Ok(entities::Providers::find()
            .filter(Column::Enabled.eq(true))
            .all(&self.db)
            .await?
            .into_iter()
            .map(provider_row)
            .collect())
    }

    async fn provider_by_id(&self, provider_id: i64) -> StorageResult<Option<ProviderRow>> {
        Ok(entities::Providers::find_by_id(provider_id)
            .one(&self.db)
            .await?
            .map(provider_row))
    }

    async fn insert_provider(&self, row: &ProviderRow) -> StorageResult<i64> {
        use entities::providers::ActiveModel as ProviderActive;
        let now = OffsetDateTime::now_utc();
        let active = ProviderActive {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(row.name.clone()),
            provider_type: ActiveValue::Set(row.provider_type.clone()),
            base_url: ActiveValue::Set(row.base_url.clone()),
            admin_token: ActiveValue::Set(row.admin_token.clone()),
            api_key: ActiveValue::Set(row.api_key.clone()),
            user_id: ActiveValue::Set(row.user_id),
            enabled: ActiveValue::Set(row.enabled),
            priority: ActiveValue::Set(row.priority),
            weight: ActiveValue::Set(row.weight),
            checkin_enabled: ActiveValue::Set(row.checkin_enabled),
            last_checkin_at: ActiveValue::Set(row.last_checkin_at),
            last_synced_at: ActiveValue::Set(row.last_synced_at),
            balance_display: ActiveValue::Set(row.balance_display.clone()),
            balance_usd: ActiveValue::Set(row.balance_usd),
            pricing_group_ratio: ActiveValue::Set(row.pricing_group_ratio.clone()),
            model_alias_mapping: ActiveValue::Set(row.model_alias_mapping.clone()),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::Providers::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn record_sync_success(
        &self,
        provider_id: i64,
        balance_display: Option<&str>,
        balance_usd: Option<f64>,
        at: OffsetDateTime,
    ) -> StorageResult<()> {
        use entities::providers::ActiveModel as ProviderActive;
        let Some(model) = entities::Providers::find_by_id(provider_id)
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        let mut active: ProviderActive = model.into();
        if let Some(display) = balance_display {
            active.balance_display = ActiveValue::Set(Some(display.to_string()));
        }
        if let Some(usd) = balance_usd {
            active.balance_usd = ActiveValue::Set(Some(usd));
        }
        active.last_synced_at = ActiveValue::Set(Some(at));
        active.updated_at = ActiveValue::Set(at);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn record_checkin_result(
        &self,
        provider_id: i64,
        checkin_enabled: Option<bool>,
        last_checkin_at: Option<OffsetDateTime>,
    ) -> StorageResult<()> {
        use entities::providers::ActiveModel as ProviderActive;
        let Some(model) = entities::Providers::find_by_id(provider_id)
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        let mut active: ProviderActive = model.into();
        if let Some(enabled) = checkin_enabled {
            active.checkin_enabled = ActiveValue::Set(enabled);
        }
        if let Some(at) = last_checkin_at {
            active.last_checkin_at = ActiveValue::Set(Some(at));
        }
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn providers_checkin_enabled(&self) -> StorageResult<Vec<ProviderRow>> {
        use entities::providers::Column;
        Ok(entities::Providers::find()
            .filter(Column::Enabled.eq(true))
            .filter(Column::CheckinEnabled.eq(true))
            .all(&self.db)
            .await?
            .into_iter()
            .map(provider_row)
            .collect())
    }

    async fn replace_pricing(
        &self,
        provider_id: i64,
        rows: Vec<PricingUpsert>,
        at: OffsetDateTime,
    ) -> StorageResult<()> {
        use entities::pricing::{ActiveModel as PricingActive, Column};

        let txn = self.db.begin().await?;
        entities::Pricing::delete_many()
            .filter(Column::ProviderId.eq(provider_id))
            .exec(&txn)
            .await?;
        for chunk in rows.chunks(50) {
            let actives: Vec<PricingActive> = chunk
                .iter()
                .map(|row| PricingActive {
                    id: ActiveValue::NotSet,
                    provider_id: ActiveValue::Set(provider_id),
                    model_name: ActiveValue::Set(row.model_name.clone()),
                    quota_type: ActiveValue::Set(row.quota_type),
                    model_ratio: ActiveValue::Set(row.model_ratio),
                    completion_ratio: ActiveValue::Set(row.completion_ratio),
                    model_price: ActiveValue::Set(row.model_price),
                    enable_groups: ActiveValue::Set(row.enable_groups.clone()),
                    last_synced_at: ActiveValue::Set(at),
                })
                .collect();
            if !actives.is_empty() {
                entities::Pricing::insert_many(actives).exec(&txn).await?;
            }
        }
        txn.commit().await?;
        Ok(())
    }

    async fn pricing_for_provider(&self, provider_id: i64) -> StorageResult<Vec<PricingRow>> {
        use entities::pricing::Column;
        Ok(entities::Pricing::find()
            .filter(Column::ProviderId.eq(provider_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(pricing_row)
            .collect())
    }

    async fn reconcile_credentials(
        &self,
        provider_id: i64,
        rows: Vec<CredentialUpsert>,
    ) -> StorageResult<()> {
        use entities::credentials::{ActiveModel as CredentialActive, Column};

        let now = OffsetDateTime::now_utc();
        let existing = entities::Credentials::find()
            .filter(Column::ProviderId.eq(provider_id))
            .all(&self.db)
            .await?;
        let mut existing_by_upstream: HashMap<i64, entities::credentials::Model> = HashMap::new();
        for model in existing {
            if let Some(upstream_id) = model.upstream_token_id {
                existing_by_upstream.insert(upstream_id, model);
            }
        }

        let mut seen_upstream_ids: Vec<i64> = Vec::new();
        for row in &rows {
            if let Some(upstream_id) = row.upstream_token_id {
                seen_upstream_ids.push(upstream_id);
            }
            match row
                .upstream_token_id
                .and_then(|id| existing_by_upstream.get(&id))
            {
                Some(model) => {
                    let mut active: CredentialActive = model.clone().into();
                    active.secret = ActiveValue::Set(row.secret.clone());
                    active.group_name = ActiveValue::Set(row.group_name.clone());
                    active.enabled = ActiveValue::Set(row.enabled);
                    active.remain_quota = ActiveValue::Set(row.remain_quota);
                    active.unlimited_quota = ActiveValue::Set(row.unlimited_quota);
                    active.model_limits = ActiveValue::Set(row.model_limits.clone());
                    active.updated_at = ActiveValue::Set(now);
                    active.update(&self.db).await?;
                }
                None => {
                    let active = CredentialActive {
                        id: ActiveValue::NotSet,
                        provider_id: ActiveValue::Set(provider_id),
                        upstream_token_id: ActiveValue::Set(row.upstream_token_id),
                        secret: ActiveValue::Set(row.secret.clone()),
                        group_name: ActiveValue::Set(row.group_name.clone()),
                        enabled: ActiveValue::Set(row.enabled),
                        remain_quota: ActiveValue::Set(row.remain_quota),
                        unlimited_quota: ActiveValue::Set(row.unlimited_quota),
                        model_limits: ActiveValue::Set(row.model_limits.clone()),
                        created_at: ActiveValue::Set(now),
                        updated_at: ActiveValue::Set(now),
                    };
                    entities::Credentials::insert(active).exec(&self.db).await?;
                }
            }
        }

        let stale: Vec<i64> = existing_by_upstream
            .into_iter()
            .filter(|(upstream_id, _)| !seen_upstream_ids.contains(upstream_id))
            .map(|(_, model)| model.id)
            .collect();
        if !stale.is_empty() {
            entities::Credentials::delete_many()
                .filter(entities::credentials::Column::Id.is_in(stale))
                .exec(&self.db)
                .await?;
        }
        Ok(())
    }

    async fn credentials_for_provider(&self, provider_id: i64) -> StorageResult<Vec<CredentialRow>> {
        use entities::credentials::Column;
        Ok(entities::Credentials::find()
            .filter(Column::ProviderId.eq(provider_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(credential_row)
            .collect())
    }

    async fn rebuild_routes(&self, provider_id: i64, seeds: Vec<RouteSeed>) -> StorageResult<()> {
        use entities::routes::{ActiveModel as RouteActive, Column};

        let existing = entities::Routes::find()
            .filter(Column::ProviderId.eq(provider_id))
            .all(&self.db)
            .await?;
        let mut overrides: HashMap<(i64, String), (bool, i32, i32)> = HashMap::new();
        for row in &existing {
            overrides.insert(
                (row.credential_id, row.model_name.clone()),
                (row.enabled, row.priority, row.weight),
            );
        }

        let txn = self.db.begin().await?;
        entities::Routes::delete_many()
            .filter(Column::ProviderId.eq(provider_id))
            .exec(&txn)
            .await?;

        for chunk in seeds.chunks(50) {
            let actives: Vec<RouteActive> = chunk
                .iter()
                .map(|seed| {
                    let key = (seed.credential_id, seed.model_name.clone());
                    let (enabled, priority, weight) =
                        overrides.get(&key).copied().unwrap_or((true, 0, 0));
                    RouteActive {
                        id: ActiveValue::NotSet,
                        provider_id: ActiveValue::Set(provider_id),
                        credential_id: ActiveValue::Set(seed.credential_id),
                        model_name: ActiveValue::Set(seed.model_name.clone()),
                        enabled: ActiveValue::Set(enabled),
                        priority: ActiveValue::Set(priority),
                        weight: ActiveValue::Set(weight),
                    }
                })
                .collect();
            if !actives.is_empty() {
                entities::Routes::insert_many(actives).exec(&txn).await?;
            }
        }
        txn.commit().await?;
        Ok(())
    }

    async fn routes_enabled(&self) -> StorageResult<Vec<RouteRow>> {
        use entities::routes::Column;
        Ok(entities::Routes::find()
            .filter(Column::Enabled.eq(true))
            .all(&self.db)
            .await?
            .into_iter()
            .map(route_row)
            .collect())
    }

    async fn set_route_overrides(
        &self,
        route_id: i64,
        enabled: Option<bool>,
        priority: Option<i32>,
        weight: Option<i32>,
    ) -> StorageResult<()> {
        use entities::routes::ActiveModel as RouteActive;
        let Some(model) = entities::Routes::find_by_id(route_id).one(&self.db).await? else {
            return Ok(());
        };
        let mut active: RouteActive = model.into();
        if let Some(enabled) = enabled {
            active.enabled = ActiveValue::Set(enabled);
        }
        if let Some(priority) = priority {
            active.priority = ActiveValue::Set(priority);
        }
        if let Some(weight) = weight {
            active.weight = ActiveValue::Set(weight);
        }
        active.update(&self.db).await?;
        Ok(())
    }

    async fn aggregated_tokens(&self) -> StorageResult<Vec<AggregatedTokenRow>> {
        Ok(entities::AggregatedTokens::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(agg_token_row)
            .collect())
    }

    async fn insert_observation(&self, obs: NewObservation) -> StorageResult<()> {
        use entities::observations::ActiveModel as ObservationActive;
        let active = ObservationActive {
            id: ActiveValue::NotSet,
            request_id: ActiveValue::Set(obs.request_id),
            user_id: ActiveValue::Set(obs.user_id),
            agg_token_id: ActiveValue::Set(obs.agg_token_id),
            provider_id: ActiveValue::Set(obs.provider_id),
            credential_id: ActiveValue::Set(obs.credential_id),
            model_name: ActiveValue::Set(obs.model_name),
            prompt_tokens: ActiveValue::Set(obs.prompt_tokens),
            completion_tokens: ActiveValue::Set(obs.completion_tokens),
            cache_tokens: ActiveValue::Set(obs.cache_tokens),
            cache_tokens_5m: ActiveValue::Set(obs.cache_tokens_5m),
            cache_tokens_1h: ActiveValue::Set(obs.cache_tokens_1h),
            response_time_ms: ActiveValue::Set(obs.response_time_ms),
            first_token_ms: ActiveValue::Set(obs.first_token_ms),
            is_stream: ActiveValue::Set(obs.is_stream),
            cost_usd: ActiveValue::Set(obs.cost_usd),
            status: ActiveValue::Set(obs.status),
            error_message: ActiveValue::Set(obs.error_message),
            client_ip: ActiveValue::Set(obs.client_ip),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::Observations::insert(active).exec(&self.db).await?;
        Ok(())
    }

    async fn recent_cost(
        &self,
        window_hours: i64,
    ) -> StorageResult<HashMap<(i64, String), f64>> {
        use entities::observations::Column;

        #[derive(Debug, FromQueryResult)]
        struct Row {
            credential_id: Option<i64>,
            model_name: String,
            cost_usd: Option<f64>,
        }

        let since = OffsetDateTime::now_utc() - time::Duration::hours(window_hours);
        let rows = entities::Observations::find()
            .select_only()
            .column(Column::CredentialId)
            .column(Column::ModelName)
            .column_as(Column::CostUsd.sum(), "cost_usd")
            .filter(Column::Status.eq(1))
            .filter(Column::CreatedAt.gte(since))
            .group_by(Column::CredentialId)
            .group_by(Column::ModelName)
            .into_model::<Row>()
            .all(&self.db)
            .await?;

        let mut out = HashMap::new();
        for row in rows {
            if let Some(credential_id) = row.credential_id {
                out.insert((credential_id, row.model_name), row.cost_usd.unwrap_or(0.0));
            }
        }
        Ok(out)
    }

    async fn health_stats(
        &self,
        window_hours: i64,
    ) -> StorageResult<HashMap<(i64, String), HealthStats>> {
        use entities::observations::Column;

        #[derive(Debug, FromQueryResult)]
        struct Row {
            credential_id: Option<i64>,
            model_name: String,
            status: i32,
            count: Option<i64>,
            avg_response_time_ms: Option<f64>,
        }

        let since = OffsetDateTime::now_utc() - time::Duration::hours(window_hours);
        let rows = entities::Observations::find()
            .select_only()
            .column(Column::CredentialId)
            .column(Column::ModelName)
            .column(Column::Status)
            .column_as(Column::Id.count(), "count")
            .column_as(Column::ResponseTimeMs.avg(), "avg_response_time_ms")
            .filter(Column::CreatedAt.gte(since))
            .group_by(Column::CredentialId)
            .group_by(Column::ModelName)
            .group_by(Column::Status)
            .into_model::<Row>()
            .all(&self.db)
            .await?;

        let mut out: HashMap<(i64, String), HealthStats> = HashMap::new();
        for row in rows {
            let Some(credential_id) = row.credential_id else {
                continue;
            };
            let key = (credential_id, row.model_name);
            let entry = out.entry(key).or_default();
            let count = row.count.unwrap_or(0);
            if row.status == 1 {
                entry.success_count += count;
            } else {
                entry.error_count += count;
            }
            entry.sample_count += count;
            if let Some(avg) = row.avg_response_time_ms {
                // Weighted merge across the two status buckets.
                let prior_weight = (entry.sample_count - count).max(0) as f64;
                let total = prior_weight + count as f64;
                if total > 0.0 {
                    entry.mean_response_time_ms =
                        (entry.mean_response_time_ms * prior_weight + avg * count as f64) / total;
                }
            }
        }
        Ok(out)
    }

    async fn get_option(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(entities::Options::find_by_id(key.to_string())
            .one(&self.db)
            .await?
            .map(|m| m.value))
    }

    async fn list_options(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(entities::Options::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| (m.key, m.value))
            .collect())
    }

    async fn set_option(&self, key: &str, value: &str) -> StorageResult<()> {
        use entities::options::ActiveModel as OptionActive;
        let now = OffsetDateTime::now_utc();
        let existing = entities::Options::find_by_id(key.to_string())
            .one(&self.db)
            .await?;
        match existing {
            Some(model) => {
                let mut active: OptionActive = model.into();
                active.value = ActiveValue::Set(value.to_string());
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = OptionActive {
                    key: ActiveValue::Set(key.to_string()),
                    value: ActiveValue::Set(value.to_string()),
                    updated_at: ActiveValue::Set(now),
                };
                entities::Options::insert(active).exec(&self.db).await?;
            }
        }
        Ok(())
    }
}
