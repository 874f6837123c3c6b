//! Per-client token-bucket rate limiting.
//!
//! Flow Overview:
//! 1) Each client key (peer IP, no port) owns one bucket that refills continuously
//!    at `rps` tokens per second up to `burst`.
//! 2) `allow` refills, then spends one token if available. Denial never blocks.
//! 3) A sweep task started with `start` evicts entries idle longer than
//!    [`RETENTION`], every [`SWEEP_INTERVAL`], until `stop` is called.
//!
//! All entry state sits behind one mutex; nothing awaits while holding it.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info};

use crate::api::error::ApiError;
use crate::clock::{elapsed_between, Clock};

/// Idle time after which an entry is evicted.
pub const RETENTION: Duration = Duration::from_secs(3 * 60);
/// Cadence of the eviction sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq)]
pub struct LimiterConfig {
    enabled: bool,
    rps: f64,
    burst: u32,
    trust_proxy: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: 2.0,
            burst: 4,
            trust_proxy: false,
        }
    }
}

impl LimiterConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_rps(mut self, rps: f64) -> Self {
        self.rps = rps;
        self
    }

    #[must_use]
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Prefer `X-Forwarded-For` / `X-Real-IP` over the socket peer address.
    #[must_use]
    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn rps(&self) -> f64 {
        self.rps
    }

    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }

    #[must_use]
    pub fn trust_proxy(&self) -> bool {
        self.trust_proxy
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl Bucket {
    fn full(burst: u32, now: DateTime<Utc>) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: now,
        }
    }

    fn take(&mut self, rps: f64, burst: u32, now: DateTime<Utc>) -> bool {
        let elapsed = elapsed_between(self.last_refill, now).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rps).min(f64::from(burst));
        if now > self.last_refill {
            self.last_refill = now;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Entry {
    bucket: Bucket,
    last_seen: DateTime<Utc>,
}

pub struct RateLimiter {
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spend one token for `key`, creating its bucket on first sight.
    pub fn allow(&self, key: &str) -> bool {
        if !self.config.enabled {
            return true;
        }
        let now = self.clock.now();
        let mut entries = self.entries();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            bucket: Bucket::full(self.config.burst, now),
            last_seen: now,
        });
        entry.last_seen = now;
        entry.bucket.take(self.config.rps, self.config.burst, now)
    }

    /// Evict entries idle longer than [`RETENTION`]; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| elapsed_between(entry.last_seen, now) <= RETENTION);
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Spawn the eviction sweep. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() {
            return;
        }
        let limiter = Arc::clone(self);
        *sweeper = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(removed, remaining = limiter.len(), "rate limiter sweep");
                }
            }
        }));
        info!(
            rps = self.config.rps,
            burst = self.config.burst,
            "rate limiter sweep started"
        );
    }

    pub fn stop(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("rate limiter sweep stopped");
        }
    }

    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Extract a client IP from common proxy headers.
pub(crate) fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn client_key(
    config: &LimiterConfig,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
) -> Option<String> {
    if config.trust_proxy {
        if let Some(ip) = forwarded_client_ip(headers) {
            return Some(ip);
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

/// Middleware: deny with 429 once the client's bucket is empty.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.config().enabled() {
        return next.run(request).await;
    }

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let Some(key) = client_key(limiter.config(), peer, request.headers()) else {
        return ApiError::Internal(anyhow::anyhow!("client address unavailable")).into_response();
    };

    if !limiter.allow(&key) {
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}
