pub mod rate_limiter;
pub mod retry;
pub mod time;

pub use rate_limiter::RateLimiter;
pub use retry::{with_retry, RetryPolicy};
pub use time::*;
