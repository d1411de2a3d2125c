pub mod db;
pub mod entities;
pub mod seaorm;
pub mod snapshot;
pub mod storage;

pub use seaorm::SeaOrmStorage;
pub use snapshot::{
    AggregatedTokenRow, CredentialRow, GlobalConfigRow, PricingRow, ProviderRow, RouteRow,
    StorageSnapshot,
};
pub use storage::{
    CredentialUpsert, HealthStats, NewObservation, PricingUpsert, RouteSeed, Storage,
    StorageError, StorageResult,
};
