//! Route handlers. Each one translates parsed input into model calls and wraps
//! the result in a single-key JSON envelope.

pub mod health;
pub mod metrics;
pub mod movies;
pub mod permissions;
pub mod tokens;
pub mod users;

use std::time::Duration;

/// Lifetime of the token mailed at registration.
pub const ACTIVATION_TOKEN_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);
/// Lifetime of a bearer token issued at login.
pub const AUTHENTICATION_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);
