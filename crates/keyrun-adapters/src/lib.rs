//! Game-data API adapters: typed payloads, normalization, endpoint enumeration
//! and authentication.

pub mod api;
pub mod auth;
pub mod endpoints;
pub mod normalize;
pub mod payload;

pub use api::{parse_cluster_index, parse_period_index, ApiError, GameDataApi};
pub use auth::{
    AccessToken, AuthError, AuthRetryPolicy, Authenticator, ClientCredentialsAuthenticator,
    StaticTokenAuthenticator, DEFAULT_TOKEN_URL,
};
pub use endpoints::{ApiEndpoints, DEFAULT_BASE_URL, DEFAULT_LOCALE};
pub use normalize::{
    region_from_self_link, LeaderboardBatch, LeaderboardNormalizer, NormalizeError,
    RejectedGroup, MAX_GROUPS_PER_LEADERBOARD,
};
pub use payload::LeaderboardResponse;
