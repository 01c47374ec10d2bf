pub mod client;
pub mod endpoints;
pub mod rate_limiter;
pub mod retry;
pub mod transport;

pub use client::RiotClient;
pub use endpoints::{ApiRequest, MatchListQuery, Platform, Region, RequestKey, Routing};
pub use rate_limiter::{RateLimiter, RateLimiterRegistry, WindowLimit};
pub use retry::{RetryPolicy, RetryState};
pub use transport::{HttpResponse, ReqwestTransport, Transport};
