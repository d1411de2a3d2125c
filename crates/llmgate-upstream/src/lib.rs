pub mod client;
pub mod cloudflare;
pub mod types;

pub use client::{KeyOnlyClient, UpstreamAdminClient, UpstreamError};
pub use cloudflare::looks_like_challenge;
pub use types::{
    CreateTokenRequest, UpstreamCheckinData, UpstreamEnvelope, UpstreamModelList,
    UpstreamModelListEntry, UpstreamPricing, UpstreamToken, UpstreamUserSelf,
    BALANCE_UNITS_PER_USD,
};
