//! axum layer: converts the routing/core layer's plain types into HTTP.

pub mod admin;
pub mod proxy;

pub use admin::admin_router;
pub use proxy::proxy_router;
