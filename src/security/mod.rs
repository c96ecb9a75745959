//! Write-path authorization and abuse protection.

pub mod capability;
pub mod rate_limiter;

pub use capability::{constant_time_eq, AuthError, CapabilityGuard, NonceStore, Principal};
pub use rate_limiter::{GatewayRateLimiter, RATE_LIMIT_WINDOW_SECS};
