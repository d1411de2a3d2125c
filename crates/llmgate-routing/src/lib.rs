//! Route selection engine for the gateway.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client: it turns a `StorageSnapshot` plus usage/health aggregates into an
//! in-memory registry, and turns a requested model name into an ordered
//! retry plan. IO (the transparent proxy, the upstream admin client) lives
//! one layer up.

pub mod errors;
pub mod headers;
pub mod model_key;
pub mod options;
pub mod registry;
pub mod select;

pub use errors::{RoutingError, RoutingResult};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use model_key::{AliasTable, matches as model_matches, normalize_model_name, version_agnostic_key};
pub use options::{OptionsError, RoutingOptions, SharedRoutingOptions};
pub use registry::{AggregatedTokenInfo, CredentialInfo, ProviderInfo, Registry, RegistryIndex, RouteCandidate};
pub use select::{RouteAttempt, Tier, plan};
