//! The request gatekeeper: panic containment, rate limiting, authentication and
//! per-route authorization. Wiring order lives in [`crate::api::app`].

pub mod authenticate;
pub mod authorize;
pub mod panic_guard;
pub mod rate_limit;

pub use authenticate::authenticate;
pub use authorize::{gated, Gate};
pub use panic_guard::recover;
pub use rate_limit::{rate_limit, LimiterConfig, RateLimiter};
