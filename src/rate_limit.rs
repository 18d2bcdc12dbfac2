//! Per-endpoint token-bucket rate limiting.
//!
//! Buckets refill continuously (time-based, not batch). Exhaustion defers
//! dispatch; it is never treated as a delivery failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Token-bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Continuous refill rate.
    pub requests_per_second: f64,
    /// Bucket capacity; the maximum burst of back-to-back dispatches.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // 1000 deliveries/hour with a modest burst allowance.
        Self::per_hour(1000).with_burst_size(50)
    }
}

impl RateLimitConfig {
    /// Create a configuration from a rate and burst size.
    #[must_use]
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }

    /// Create a configuration from an hourly budget (burst = budget/10, min 1).
    #[must_use]
    pub fn per_hour(tokens: u32) -> Self {
        Self {
            requests_per_second: f64::from(tokens) / 3600.0,
            burst_size: (tokens / 10).max(1),
        }
    }

    /// Set the refill rate.
    #[must_use]
    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    /// Set the bucket capacity.
    #[must_use]
    pub fn with_burst_size(mut self, burst: u32) -> Self {
        self.burst_size = burst;
        self
    }
}

/// Result of a non-consuming rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitResult {
    Allowed,
    /// A token becomes available after this duration.
    Wait(Duration),
}

/// Token bucket for a single endpoint.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a full bucket.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: f64::from(config.burst_size),
            last_refill: Instant::now(),
            config,
        }
    }

    /// Add tokens for the time elapsed since the last refill, capped at
    /// the burst size.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.config.requests_per_second)
            .min(f64::from(self.config.burst_size));
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whether a token is currently available.
    pub fn has_capacity(&mut self) -> bool {
        self.refill();
        self.tokens >= 1.0
    }

    /// Current token count (after refill).
    pub fn available_tokens(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    /// Time until the next token is available; zero if one is available now.
    pub fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.config.requests_per_second <= 0.0 {
            // Bucket can never refill; report an hour so callers defer
            // rather than spin.
            return Duration::from_secs(3600);
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit / self.config.requests_per_second)
    }

    /// Take a token, sleeping until one is available. Returns how long the
    /// caller waited.
    pub async fn acquire(&mut self) -> Duration {
        let wait = self.time_until_available();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
            self.refill();
        }
        self.tokens = (self.tokens - 1.0).max(0.0);
        wait
    }
}

/// Registry of per-endpoint token buckets.
///
/// Buckets are created lazily from the default configuration; individual
/// endpoints may carry an override via [`set_config`](Self::set_config).
#[derive(Clone)]
pub struct RateLimiterRegistry {
    limiters: Arc<RwLock<HashMap<Uuid, RateLimiter>>>,
    default_config: RateLimitConfig,
}

impl RateLimiterRegistry {
    /// Create a registry with the given default bucket configuration.
    #[must_use]
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            limiters: Arc::new(RwLock::new(HashMap::new())),
            default_config,
        }
    }

    /// Take one token for an endpoint if available.
    pub async fn try_acquire(&self, endpoint_id: Uuid) -> bool {
        self.try_acquire_with(endpoint_id, None).await
    }

    /// Take one token for an endpoint if available. A missing bucket is
    /// created from `override_config` when given, otherwise from the
    /// default; an existing bucket is used as-is.
    pub async fn try_acquire_with(
        &self,
        endpoint_id: Uuid,
        override_config: Option<RateLimitConfig>,
    ) -> bool {
        let mut limiters = self.limiters.write().await;
        limiters
            .entry(endpoint_id)
            .or_insert_with(|| RateLimiter::new(override_config.unwrap_or(self.default_config)))
            .try_acquire()
    }

    /// Non-consuming check of an endpoint's bucket.
    pub async fn check(&self, endpoint_id: Uuid) -> RateLimitResult {
        let wait = self.time_until_available(endpoint_id).await;
        if wait.is_zero() {
            RateLimitResult::Allowed
        } else {
            RateLimitResult::Wait(wait)
        }
    }

    /// Time until the endpoint's next token; zero if one is available.
    pub async fn time_until_available(&self, endpoint_id: Uuid) -> Duration {
        let mut limiters = self.limiters.write().await;
        limiters
            .entry(endpoint_id)
            .or_insert_with(|| RateLimiter::new(self.default_config))
            .time_until_available()
    }

    /// Take a token for an endpoint, sleeping until one is available.
    /// Returns how long the caller waited.
    pub async fn acquire(&self, endpoint_id: Uuid) -> Duration {
        // Compute the wait under the lock, sleep outside it.
        loop {
            let wait = {
                let mut limiters = self.limiters.write().await;
                let limiter = limiters
                    .entry(endpoint_id)
                    .or_insert_with(|| RateLimiter::new(self.default_config));
                if limiter.try_acquire() {
                    return Duration::ZERO;
                }
                limiter.time_until_available()
            };
            tokio::time::sleep(wait).await;
            let mut limiters = self.limiters.write().await;
            if let Some(limiter) = limiters.get_mut(&endpoint_id) {
                if limiter.try_acquire() {
                    return wait;
                }
            }
        }
    }

    /// Install a per-endpoint override (replaces the bucket).
    pub async fn set_config(&self, endpoint_id: Uuid, config: RateLimitConfig) {
        let mut limiters = self.limiters.write().await;
        limiters.insert(endpoint_id, RateLimiter::new(config));
    }

    /// Drop an endpoint's bucket (a fresh full bucket is created on next use).
    pub async fn remove(&self, endpoint_id: Uuid) {
        self.limiters.write().await.remove(&endpoint_id);
    }

    /// Drop all buckets.
    pub async fn clear(&self) {
        self.limiters.write().await.clear();
    }

    /// Number of tracked buckets.
    pub async fn count(&self) -> usize {
        self.limiters.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_allows_burst_then_throttles() {
        let mut limiter = RateLimiter::new(RateLimitConfig::new(10.0, 3));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn empty_bucket_reports_wait() {
        let mut limiter = RateLimiter::new(RateLimitConfig::new(10.0, 1));
        assert!(limiter.try_acquire());
        let wait = limiter.time_until_available();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(110));
    }

    #[test]
    fn zero_burst_never_allows() {
        let mut limiter = RateLimiter::new(RateLimitConfig::new(10.0, 0));
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn default_config_is_hourly_budget() {
        let config = RateLimitConfig::default();
        assert!((config.requests_per_second - 1000.0 / 3600.0).abs() < 1e-9);
        assert_eq!(config.burst_size, 50);
    }

    #[test]
    fn config_serialization_round_trip() {
        let config = RateLimitConfig::new(50.0, 100);
        let json = serde_json::to_string(&config).unwrap();
        let back: RateLimitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let mut limiter = RateLimiter::new(RateLimitConfig::new(1000.0, 1));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn refill_caps_at_burst() {
        let mut limiter = RateLimiter::new(RateLimitConfig::new(1000.0, 5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.available_tokens(), 5.0);
    }

    #[tokio::test]
    async fn acquire_waits_for_token() {
        let mut limiter = RateLimiter::new(RateLimitConfig::new(100.0, 1));
        assert_eq!(limiter.acquire().await, Duration::ZERO);
        let wait = limiter.acquire().await;
        assert!(wait > Duration::ZERO);
        assert!(wait < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn registry_isolates_endpoints() {
        let registry = RateLimiterRegistry::new(RateLimitConfig::new(10.0, 1));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(registry.try_acquire(a).await);
        assert!(registry.try_acquire(b).await);
        assert!(!registry.try_acquire(a).await);
        assert!(!registry.try_acquire(b).await);
    }

    #[tokio::test]
    async fn registry_override_replaces_bucket() {
        let registry = RateLimiterRegistry::new(RateLimitConfig::new(10.0, 1));
        let id = Uuid::new_v4();

        registry.set_config(id, RateLimitConfig::new(10.0, 100)).await;
        for i in 0..100 {
            assert!(registry.try_acquire(id).await, "failed at {i}");
        }
        assert!(!registry.try_acquire(id).await);
    }

    #[tokio::test]
    async fn acquire_with_override_shapes_new_bucket() {
        let registry = RateLimiterRegistry::new(RateLimitConfig::new(10.0, 50));
        let id = Uuid::new_v4();

        // Bucket is created with the override's capacity, not the default's.
        let tight = RateLimitConfig::per_hour(1);
        assert!(registry.try_acquire_with(id, Some(tight)).await);
        assert!(!registry.try_acquire_with(id, Some(tight)).await);

        // An existing bucket is untouched by later overrides.
        assert!(!registry.try_acquire_with(id, None).await);
    }

    #[tokio::test]
    async fn registry_remove_resets_bucket() {
        let registry = RateLimiterRegistry::new(RateLimitConfig::new(10.0, 1));
        let id = Uuid::new_v4();

        assert!(registry.try_acquire(id).await);
        assert!(!registry.try_acquire(id).await);

        registry.remove(id).await;
        assert!(registry.try_acquire(id).await);
    }

    #[tokio::test]
    async fn registry_check_and_count_and_clear() {
        let registry = RateLimiterRegistry::new(RateLimitConfig::new(10.0, 1));
        let id = Uuid::new_v4();

        assert_eq!(registry.check(id).await, RateLimitResult::Allowed);
        registry.try_acquire(id).await;
        match registry.check(id).await {
            RateLimitResult::Wait(d) => assert!(d > Duration::ZERO),
            RateLimitResult::Allowed => panic!("expected Wait"),
        }

        assert_eq!(registry.count().await, 1);
        registry.clear().await;
        assert_eq!(registry.count().await, 0);
    }
}
