pub mod retry;

pub use retry::{
    parse_retry_after, Failure, RetryConfig, RetryContext, RetryPolicy, RetryState,
    TransportErrorKind,
};
