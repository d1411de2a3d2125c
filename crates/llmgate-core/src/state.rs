//! Process-wide shared state (§5). One instance lives for the life of the
//! process and is handed to both the router layer and the background
//! scheduler; every field is independently hot-swappable so a sync tick,
//! a checkin tick, or an admin write never blocks an in-flight request.
//! Grounded on `gproxy-core/src/state/mod.rs`'s `ArcSwap`-per-field shape,
//! narrowed to this design's single `RegistryIndex` (no per-provider
//! `CredentialPool`, since credentials are plain secret strings held in the
//! registry itself rather than live OAuth sessions).

use std::sync::Arc;

use arc_swap::ArcSwap;

use llmgate_common::{GlobalConfig, GlobalConfigPatch};
use llmgate_routing::{Registry, RegistryIndex, SharedRoutingOptions};
use llmgate_storage::Storage;

use crate::proxy::ProxyEngine;

pub struct AppState {
    pub global: ArcSwap<GlobalConfig>,
    pub registry: Arc<Registry>,
    pub routing_options: Arc<SharedRoutingOptions>,
    pub storage: Arc<dyn Storage>,
    pub proxy: ProxyEngine,
}

impl AppState {
    pub fn new(
        global: GlobalConfig,
        index: RegistryIndex,
        routing_options: SharedRoutingOptions,
        storage: Arc<dyn Storage>,
        proxy: ProxyEngine,
    ) -> Self {
        Self {
            global: ArcSwap::from_pointee(global),
            registry: Registry::new(index),
            routing_options: Arc::new(routing_options),
            storage,
            proxy,
        }
    }

    pub fn apply_global_config_patch(&self, patch: GlobalConfigPatch) -> anyhow::Result<GlobalConfig> {
        let current = self.global.load().as_ref().clone();
        let mut merged = GlobalConfigPatch::from(current);
        merged.overlay(patch);
        let next = merged.into_config()?;
        self.global.store(Arc::new(next.clone()));
        Ok(next)
    }

    /// Swap in a freshly rebuilt registry snapshot (post sync tick, §4.G).
    pub fn refresh_registry(&self, index: RegistryIndex) {
        self.registry.swap(index);
    }
}
