//! # Sunrise (Movie Catalogue API)
//!
//! `sunrise` is a JSON HTTP API for a movie catalogue. Every request passes a
//! gatekeeper pipeline before it reaches a handler:
//!
//! ```text
//! PanicGuard -> RateLimiter -> Authenticator -> (per-route) Gate -> handler
//! ```
//!
//! ## Rate Limiting
//!
//! Each client address owns a token bucket refilled continuously at `rps` tokens
//! per second up to `burst`. Idle buckets are evicted by a background sweep
//! (every minute, entries idle for more than three minutes).
//!
//! ## Authentication
//!
//! Clients present `Authorization: Bearer <token>`. Tokens are 26-character
//! base32 strings; only their SHA-256 digest is persisted. Missing headers
//! resolve to the anonymous principal; malformed, unknown, and expired tokens
//! all produce the same `401` response.
//!
//! ## Authorization
//!
//! Routes opt into exactly one gate: authenticated, activated, or a permission
//! code. Stronger gates imply the weaker ones, so an anonymous request against
//! a permission-gated route always fails with "authentication required".

pub mod api;
pub mod cli;
pub mod clock;
pub mod data;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
