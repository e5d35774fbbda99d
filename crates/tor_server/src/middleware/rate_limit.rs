//! Per-user request rate limiting.
//!
//! The limiter sits behind a trait so deployments can swap the in-memory
//! token bucket for a shared one. Keys are user ids, so the layer must run
//! inside [`super::jwt::jwt_auth`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use tor_core::principal::Session;
use tracing::warn;

use crate::error::ErrorBody;

/// Keys tracked before idle (full) buckets are evicted.
const MAX_TRACKED_KEYS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Bucket capacity, also the sustained rate per window.
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    fn refill_per_sec(&self) -> f64 {
        f64::from(self.max_requests) / self.window_secs.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Zero when allowed.
    pub retry_after: Duration,
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str, config: &RateLimitConfig) -> RateDecision;
}

// ── Token bucket ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Debug, Default)]
pub struct TokenBucketLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_at(&self, key: &str, config: &RateLimitConfig, now: Instant) -> RateDecision {
        let capacity = f64::from(config.max_requests);
        let rate = config.refill_per_sec();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        if buckets.len() >= MAX_TRACKED_KEYS && !buckets.contains_key(key) {
            buckets.retain(|_, b| {
                let elapsed = now.saturating_duration_since(b.refilled_at).as_secs_f64();
                b.tokens + elapsed * rate < capacity
            });
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            refilled_at: now,
        });
        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision {
                allowed: true,
                limit: config.max_requests,
                remaining: bucket.tokens.floor() as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            let wait = if rate > 0.0 {
                (1.0 - bucket.tokens) / rate
            } else {
                config.window_secs as f64
            };
            RateDecision {
                allowed: false,
                limit: config.max_requests,
                remaining: 0,
                retry_after: Duration::from_secs_f64(wait),
            }
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn check(&self, key: &str, config: &RateLimitConfig) -> RateDecision {
        self.check_at(key, config, Instant::now())
    }
}

// ── Middleware ────────────────────────────────────────────────

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<dyn RateLimiter>,
    pub config: RateLimitConfig,
}

impl RateLimitState {
    pub fn token_bucket(config: RateLimitConfig) -> Self {
        Self {
            limiter: Arc::new(TokenBucketLimiter::new()),
            config,
        }
    }
}

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

pub async fn rate_limit(
    Extension(state): Extension<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let key = match req.extensions().get::<Session>() {
        Some(s) => format!("user:{}", s.user_id),
        None => "anonymous".to_string(),
    };
    let decision = state.limiter.check(&key, &state.config);

    if !decision.allowed {
        let retry_secs = decision.retry_after.as_secs_f64().ceil().max(1.0) as u64;
        warn!(key = %key, retry_after_secs = retry_secs, "rate limit exceeded");
        let body = ErrorBody {
            message: format!("rate limit exceeded, retry in {retry_secs}s"),
            code: "RATE_LIMITED".into(),
            field: None,
        };
        let mut resp = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = resp.headers_mut();
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_secs));
        headers.insert(LIMIT, HeaderValue::from(decision.limit));
        headers.insert(REMAINING, HeaderValue::from(0u32));
        return resp;
    }

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(LIMIT, HeaderValue::from(decision.limit));
    headers.insert(REMAINING, HeaderValue::from(decision.remaining));
    resp
}
