pub mod auth;
pub mod bootstrap;
pub mod checkin;
pub mod error;
pub mod proxy;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod sync;
pub mod usage;

pub use auth::{authenticate, check_ip_allowed, check_model_allowed, extract_token, AuthContext, AuthFailure};
pub use error::ClassifiedError;
pub use proxy::{ObservationContext, OutboundRequest, ProxyEngine, ProxyOutcome};
pub use retry::{relay, RelayOutcome, RelayRequest};
pub use scheduler::rebuild_registry;
pub use state::AppState;
