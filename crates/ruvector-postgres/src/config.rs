//! Connection and retry configuration.

use std::time::Duration;

/// Retry configuration for connection establishment and query execution.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Full jitter fraction applied to each computed delay, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Base exponential-backoff delay before jitter, for a given attempt
    /// number (0-indexed).
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms);
        }
        let delay_ms = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay_ms as u64).min(self.max_delay_ms))
    }

    /// Applies jitter to a base delay by drawing uniformly from
    /// `[base * (1 - jitter_factor), base]`, so retries from many callers
    /// don't all wake up at exactly the same instant.
    pub fn jittered_delay(&self, base: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return base;
        }
        use rand::Rng;
        let base_ms = base.as_millis() as f64;
        let min_ms = base_ms * (1.0 - self.jitter_factor);
        let jittered = rand::thread_rng().gen_range(min_ms..=base_ms);
        Duration::from_millis(jittered as u64)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.jittered_delay(self.base_delay_for_attempt(attempt))
    }
}

/// Connection pool sizing and lifetime configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: u64,
    pub max_lifetime: Option<u64>,
    pub idle_timeout: Option<u64>,
    pub retry: RetryConfig,
    pub statement_cache_capacity: usize,
    /// Wall-clock deadline for any single `query()` call, independent of
    /// the retry budget: each retry attempt still has to fit under it.
    pub query_timeout_ms: u64,
    /// Queries at or above this duration are reported as slow and emit a
    /// `BridgeEvent::SlowQuery`.
    pub slow_query_threshold_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            connect_timeout: 30,
            max_lifetime: Some(1800),
            idle_timeout: Some(600),
            retry: RetryConfig::default(),
            statement_cache_capacity: 100,
            query_timeout_ms: 30_000,
            slow_query_threshold_ms: 1000,
        }
    }
}

/// Everything needed to establish a bridge's connection pool.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub uri: String,
    pub pool: PoolConfig,
}

impl ConnectionConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), pool: PoolConfig::default() }
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.query_timeout_ms, 30_000);
        assert_eq!(config.slow_query_threshold_ms, 1000);
    }

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
    }

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        let config = RetryConfig {
            max_retries: 6,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(config.base_delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.base_delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.base_delay_for_attempt(6), Duration::from_millis(5000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig { jitter_factor: 0.5, ..RetryConfig::default() };
        let base = Duration::from_millis(1000);
        for _ in 0..20 {
            let jittered = config.jittered_delay(base);
            assert!(jittered <= base);
            assert!(jittered >= Duration::from_millis(500));
        }
    }

    #[test]
    fn no_retry_disables_backoff() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(0));
    }
}
