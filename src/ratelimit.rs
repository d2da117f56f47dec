//! Per-client admission control.
//!
//! Every request is charged against a token bucket keyed by
//! `(QuotaClass, client key)`. Buckets refill lazily on access: no background
//! timer touches them, and the only background work is the idle sweep.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::AppError;

/// Header carrying the tokens left in the caller's bucket.
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-rate-limit-remaining");

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// QuotaClass
///
/// Admin-scoped paths draw from a smaller, separate allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaClass {
    Public,
    Admin,
}

/// Quota
///
/// Shape of a bucket: how many tokens it holds and how fast it refills.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub capacity: u32,
    pub refill_per_interval: f64,
    pub interval: Duration,
}

impl Quota {
    /// 100 requests per minute.
    pub const PUBLIC: Quota = Quota {
        capacity: 100,
        refill_per_interval: 100.0,
        interval: Duration::from_secs(60),
    };

    /// 50 requests per minute.
    pub const ADMIN: Quota = Quota {
        capacity: 50,
        refill_per_interval: 50.0,
        interval: Duration::from_secs(60),
    };
}

/// Outcome of a single `try_consume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    pub allowed: bool,
    /// Whole tokens left after this call.
    pub remaining: u64,
    /// Seconds until the denied cost could be paid. Zero when allowed.
    pub retry_after_secs: u64,
}

/// TokenBucket
///
/// Invariant: `0 <= available <= capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: u32,
    available: f64,
    refill_per_interval: f64,
    interval: Duration,
    last_refill_at: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(quota: Quota, now: Instant) -> Self {
        Self {
            capacity: quota.capacity,
            available: f64::from(quota.capacity),
            refill_per_interval: quota.refill_per_interval,
            interval: quota.interval,
            last_refill_at: now,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn available_tokens(&self) -> f64 {
        self.available
    }

    pub fn last_refill_at(&self) -> Instant {
        self.last_refill_at
    }

    fn projected(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        let interval = self.interval.as_secs_f64();
        if elapsed.is_zero() || interval <= 0.0 {
            return self.available;
        }
        let added = elapsed.as_secs_f64() / interval * self.refill_per_interval;
        (self.available + added).min(f64::from(self.capacity))
    }

    /// Adds the tokens earned since `last_refill_at`, capped at capacity.
    pub fn refill(&mut self, now: Instant) {
        self.available = self.projected(now);
        if now > self.last_refill_at {
            self.last_refill_at = now;
        }
    }

    /// Refills, then takes `cost` tokens if enough are available. The caller must
    /// hold exclusive access to the bucket for the whole call.
    pub fn try_consume(&mut self, cost: u32, now: Instant) -> Consumption {
        self.refill(now);

        let cost = f64::from(cost);
        if self.available >= cost {
            self.available -= cost;
            Consumption {
                allowed: true,
                remaining: self.available.floor() as u64,
                retry_after_secs: 0,
            }
        } else {
            Consumption {
                allowed: false,
                remaining: self.available.floor() as u64,
                retry_after_secs: self.seconds_until(cost),
            }
        }
    }

    fn seconds_until(&self, cost: f64) -> u64 {
        let interval = self.interval.as_secs_f64();
        if self.refill_per_interval <= 0.0 {
            return interval.ceil().max(1.0) as u64;
        }
        let deficit = (cost - self.available).max(0.0);
        let secs = deficit / self.refill_per_interval * interval;
        secs.ceil().max(1.0) as u64
    }

    /// A bucket that would be at capacity by `now` is indistinguishable from a new one.
    pub fn is_full_at(&self, now: Instant) -> bool {
        self.projected(now) >= f64::from(self.capacity)
    }
}

/// RateLimiter
///
/// Registry of buckets. `DashMap::entry` gives compute-if-absent creation, and the
/// entry guard keeps the shard locked while one bucket is refilled, checked and
/// decremented, so concurrent calls on the same key serialize.
pub struct RateLimiter {
    buckets: DashMap<(QuotaClass, String), TokenBucket>,
    public: Quota,
    admin: Quota,
    admin_prefix: String,
}

pub type RateLimiterState = Arc<RateLimiter>;

impl RateLimiter {
    pub fn new(public: Quota, admin: Quota, admin_prefix: impl Into<String>) -> Self {
        Self {
            buckets: DashMap::new(),
            public,
            admin,
            admin_prefix: admin_prefix.into(),
        }
    }

    pub fn resolve_quota_class(&self, path: &str) -> QuotaClass {
        if path.starts_with(&self.admin_prefix) {
            QuotaClass::Admin
        } else {
            QuotaClass::Public
        }
    }

    pub fn quota(&self, class: QuotaClass) -> Quota {
        match class {
            QuotaClass::Public => self.public,
            QuotaClass::Admin => self.admin,
        }
    }

    /// Returns a snapshot of the bucket for `(class, key)` as of now, creating it
    /// if absent.
    pub fn bucket_for(&self, class: QuotaClass, key: &str) -> TokenBucket {
        self.bucket_for_at(class, key, Instant::now())
    }

    /// Refills the bucket up to `now` before taking the snapshot, so the tokens
    /// reported are the ones a request at `now` would see.
    pub fn bucket_for_at(&self, class: QuotaClass, key: &str, now: Instant) -> TokenBucket {
        let mut bucket = self
            .buckets
            .entry((class, key.to_string()))
            .or_insert_with(|| TokenBucket::new(self.quota(class), now));
        bucket.refill(now);
        bucket.clone()
    }

    pub fn try_consume(&self, class: QuotaClass, key: &str, cost: u32) -> Consumption {
        self.try_consume_at(class, key, cost, Instant::now())
    }

    pub fn try_consume_at(&self, class: QuotaClass, key: &str, cost: u32, now: Instant) -> Consumption {
        let mut bucket = self
            .buckets
            .entry((class, key.to_string()))
            .or_insert_with(|| TokenBucket::new(self.quota(class), now));
        bucket.try_consume(cost, now)
    }

    /// Drops every bucket that has refilled to capacity. Returns how many were removed.
    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_full_at(now));
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// spawn_sweeper
///
/// Periodically evicts idle buckets so the registry only holds clients seen
/// within roughly one refill interval.
pub fn spawn_sweeper(limiter: RateLimiterState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = limiter.sweep_idle_at(Instant::now());
            if evicted > 0 {
                tracing::debug!(evicted, live = limiter.len(), "swept idle rate limit buckets");
            }
        }
    })
}

/// client_key
///
/// Resolves the caller's address: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the transport peer. The headers are trusted as-is, which is
/// only sound behind a reverse proxy that overwrites them.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// rate_limit_middleware
///
/// Charges one token before the request reaches any handler. On success the
/// response carries `X-Rate-Limit-Remaining`; on exhaustion the request is
/// answered with 429 and never forwarded.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiterState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);
    let class = limiter.resolve_quota_class(request.uri().path());

    let consumption = limiter.try_consume(class, &key, 1);
    if !consumption.allowed {
        tracing::warn!(client = %key, quota = ?class, retry_after = consumption.retry_after_secs, "rate limit exceeded");
        return AppError::Throttled {
            retry_after_secs: consumption.retry_after_secs,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(REMAINING_HEADER, HeaderValue::from(consumption.remaining));
    response
}
