//! Per-client request rate limiting.
//!
//! Each client key owns a token bucket with continuous refill. Buckets live
//! in a `moka` cache, so idle clients are evicted and the number of tracked
//! clients is bounded. The limiter is an ordinary value: whoever handles
//! requests owns it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moka::sync::Cache;

use crate::config::RateLimitConfig;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
    tokens_per_sec: f64,
}

impl TokenBucket {
    /// Full bucket holding `capacity` tokens, refilled at `tokens_per_sec`.
    pub fn new(capacity: u32, tokens_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
            tokens_per_sec,
        }
    }

    /// Takes one token if available.
    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn available(&mut self) -> u32 {
        self.refill();
        self.tokens as u32
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = self.capacity.min(self.tokens + elapsed * self.tokens_per_sec);
        self.last_refill = now;
    }
}

pub struct RateLimiter {
    burst: u32,
    requests_per_second: f64,
    buckets: Cache<Arc<str>, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let buckets = Cache::builder()
            .max_capacity(config.max_clients)
            .time_to_idle(Duration::from_secs(config.idle_eviction_secs))
            .build();
        Self {
            burst: config.burst,
            requests_per_second: config.requests_per_second,
            buckets,
        }
    }

    /// Records one request for `key`. Returns `false` when the client is
    /// over its limit.
    pub fn check(&self, key: &str) -> bool {
        let bucket = self.bucket(key);
        let allowed = match bucket.lock() {
            Ok(mut bucket) => bucket.try_consume(),
            Err(poisoned) => poisoned.into_inner().try_consume(),
        };
        if !allowed {
            log::debug!("Rate limit exceeded for {}", key);
        }
        allowed
    }

    /// Tokens left for `key` without consuming any.
    pub fn available(&self, key: &str) -> u32 {
        match self.bucket(key).lock() {
            Ok(mut bucket) => bucket.available(),
            Err(poisoned) => poisoned.into_inner().available(),
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> u64 {
        self.buckets.run_pending_tasks();
        self.buckets.entry_count()
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        let (burst, rate) = (self.burst, self.requests_per_second);
        self.buckets
            .get_with(Arc::from(key), || Arc::new(Mutex::new(TokenBucket::new(burst, rate))))
    }
}

/// Key identifying a client: the user when authenticated, otherwise the
/// address and user agent together.
pub fn client_key(user_id: Option<&str>, ip: &str, user_agent: Option<&str>) -> String {
    match user_id {
        Some(user) if !user.is_empty() => format!("user:{}", user),
        _ => format!("ip:{}_{}", ip, user_agent.unwrap_or_default()),
    }
}
