//! Run persistence and bounded-concurrency HTTP fetch utilities.

pub mod http;
pub mod postgres;
pub mod store;

pub use http::{
    classify_reqwest_error, classify_status, redact_access_token, BackoffPolicy, FetchBatch,
    FetchError, FetchFailure, FetchedResponse, HttpClientConfig, HttpFetcher, RateLimitConfig,
    RetryDisposition, TokenBucket,
};
pub use postgres::PgRunStore;
pub use store::{
    InsertReport, MemoryRunStore, RunStore, SpecActivityCount, SpecLevelCount, StoreError,
};
