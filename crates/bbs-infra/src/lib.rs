//! Infrastructure shared by the API clients: retry decisions and the
//! coalescing response cache.

pub mod cache;
pub mod resilience;

pub use cache::{CacheKeyBuilder, MemoryCacheConfig, ResponseCache};
pub use resilience::{
    parse_retry_after, Failure, RetryConfig, RetryContext, RetryPolicy, RetryState,
    TransportErrorKind,
};
