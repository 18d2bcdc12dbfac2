//! Engine configuration.
//!
//! All tunables are carried in an explicit [`EngineConfig`] passed into the
//! engine at construction; nothing is read from ambient global state.

use std::time::Duration;

use crate::rate_limit::RateLimitConfig;

/// Default consecutive-failure threshold before auto-disabling an endpoint.
pub const DEFAULT_DISABLE_THRESHOLD: i64 = 10;

/// Default maximum retries per delivery (initial attempt + 5 retries).
pub const DEFAULT_MAX_RETRIES: i64 = 5;

/// Default per-attempt HTTP timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default base delay for the exponential backoff schedule.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(10);

/// Default cap on the exponential backoff schedule.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Default retention window for terminal deliveries and audit log rows.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Engine-wide configuration with documented sane defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Require `https://` endpoint URLs. Disable only for development.
    pub require_https: bool,
    /// Permit endpoint URLs on loopback/private hosts. Disable only for
    /// development; production keeps SSRF protection on.
    pub allow_internal_hosts: bool,
    /// Default per-attempt HTTP timeout for new endpoints (seconds).
    pub default_timeout_secs: u64,
    /// Default retry budget for new endpoints (attempts = retries + 1).
    pub default_max_retries: i64,
    /// Consecutive failures before an endpoint is auto-disabled.
    pub disable_threshold: i64,
    /// Base delay for exponential backoff.
    pub base_backoff: Duration,
    /// Cap applied to the exponential backoff before jitter.
    pub max_backoff: Duration,
    /// Global token-bucket configuration (per-endpoint overrides possible).
    pub rate_limit: RateLimitConfig,
    /// How long terminal deliveries and log rows are retained.
    pub retention: Duration,
    /// 32-byte key used to encrypt endpoint secrets at rest.
    pub encryption_key: Vec<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            require_https: true,
            allow_internal_hosts: false,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_max_retries: DEFAULT_MAX_RETRIES,
            disable_threshold: DEFAULT_DISABLE_THRESHOLD,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            rate_limit: RateLimitConfig::default(),
            retention: DEFAULT_RETENTION,
            // Fresh random key per instance; supply a stable key in
            // production so secrets survive restarts.
            encryption_key: crate::crypto::generate_encryption_key().to_vec(),
        }
    }
}

impl EngineConfig {
    /// Allow plain-HTTP endpoint URLs (for development/testing).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.require_https = !allow;
        self
    }

    /// Allow endpoint URLs on loopback/private hosts (for development/testing).
    #[must_use]
    pub fn with_allow_internal_hosts(mut self, allow: bool) -> Self {
        self.allow_internal_hosts = allow;
        self
    }

    /// Set the default per-attempt timeout in seconds.
    #[must_use]
    pub fn with_default_timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Set the default retry budget.
    #[must_use]
    pub fn with_default_max_retries(mut self, retries: i64) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Set the consecutive-failure threshold for auto-disable.
    #[must_use]
    pub fn with_disable_threshold(mut self, threshold: i64) -> Self {
        self.disable_threshold = threshold;
        self
    }

    /// Set the backoff base and cap.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Set the global rate-limit configuration.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the retention window for terminal deliveries.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the at-rest encryption key (must be 32 bytes).
    #[must_use]
    pub fn with_encryption_key(mut self, key: Vec<u8>) -> Self {
        self.encryption_key = key;
        self
    }
}
