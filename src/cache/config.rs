//! Configuration for the prompt cache

use crate::error::{PromptCacheError, Result};
use chrono::Duration;

const DAY_SECS: i64 = 24 * 3600;

/// Longest accepted TTL, horizon or window (about 100 years)
pub const MAX_RETENTION_DAYS: i64 = 36_525;

/// Tunables for lookup, retention and maintenance.
///
/// Defaults:
/// - lookup window of ±5 affinity levels
/// - 30 day TTL for new rows, 60 days once an entry is hit more than 10 times
/// - pruning horizon and analytics window of 30 days
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Accepted distance between requested and stored affinity level
    pub affinity_tolerance: u8,

    /// TTL given to newly inserted entries
    pub default_ttl: Duration,

    /// TTL granted once `use_count` passes `extension_threshold`
    pub extended_ttl: Duration,

    /// Use count above which the extended TTL applies
    pub extension_threshold: u32,

    /// Upper bound on `use_count`
    pub max_use_count: u32,

    /// Entries unused for longer than this are pruned
    pub prune_horizon: Duration,

    /// Entries used fewer times than this are pruned
    pub prune_min_use_count: u32,

    /// Trailing window for usage analytics
    pub stats_window: Duration,

    /// Enable the background maintenance task
    pub enable_auto_cleanup: bool,

    /// Interval between maintenance sweeps
    pub cleanup_interval: std::time::Duration,

    /// Retries for duplicate-key and compare-and-swap conflicts
    pub max_write_retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            affinity_tolerance: 5,
            default_ttl: Duration::days(30),
            extended_ttl: Duration::days(60),
            extension_threshold: 10,
            max_use_count: 10_000,
            prune_horizon: Duration::days(30),
            prune_min_use_count: 2,
            stats_window: Duration::days(30),
            enable_auto_cleanup: true,
            // Sweep hourly
            cleanup_interval: std::time::Duration::from_secs(3600),
            max_write_retries: 5,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.affinity_tolerance > 100 {
            return Err(PromptCacheError::ConfigError(
                "affinity_tolerance must be between 0 and 100".to_string(),
            ));
        }

        if self.default_ttl <= Duration::zero() {
            return Err(PromptCacheError::ConfigError(
                "default_ttl must be positive".to_string(),
            ));
        }

        if self.extended_ttl < self.default_ttl {
            return Err(PromptCacheError::ConfigError(
                "extended_ttl must not be shorter than default_ttl".to_string(),
            ));
        }

        let longest = Duration::days(MAX_RETENTION_DAYS);
        if self.default_ttl > longest
            || self.extended_ttl > longest
            || self.prune_horizon > longest
            || self.stats_window > longest
        {
            return Err(PromptCacheError::ConfigError(format!(
                "TTLs, prune_horizon and stats_window must not exceed {} days",
                MAX_RETENTION_DAYS
            )));
        }

        if self.max_use_count == 0 || self.extension_threshold >= self.max_use_count {
            return Err(PromptCacheError::ConfigError(
                "extension_threshold must be below max_use_count".to_string(),
            ));
        }

        if self.prune_horizon <= Duration::zero() || self.stats_window <= Duration::zero() {
            return Err(PromptCacheError::ConfigError(
                "prune_horizon and stats_window must be positive".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(PromptCacheError::ConfigError(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Read overrides from `PROMPT_CACHE_*` environment variables.
    ///
    /// Durations are given in whole days, except `PROMPT_CACHE_CLEANUP_INTERVAL_SECS`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            affinity_tolerance: env_or("PROMPT_CACHE_AFFINITY_TOLERANCE", defaults.affinity_tolerance)?,
            default_ttl: env_days_or("PROMPT_CACHE_TTL_DAYS", defaults.default_ttl)?,
            extended_ttl: env_days_or("PROMPT_CACHE_EXTENDED_TTL_DAYS", defaults.extended_ttl)?,
            extension_threshold: env_or(
                "PROMPT_CACHE_EXTENSION_THRESHOLD",
                defaults.extension_threshold,
            )?,
            max_use_count: env_or("PROMPT_CACHE_MAX_USE_COUNT", defaults.max_use_count)?,
            prune_horizon: env_days_or("PROMPT_CACHE_PRUNE_HORIZON_DAYS", defaults.prune_horizon)?,
            prune_min_use_count: env_or(
                "PROMPT_CACHE_PRUNE_MIN_USE_COUNT",
                defaults.prune_min_use_count,
            )?,
            stats_window: env_days_or("PROMPT_CACHE_STATS_WINDOW_DAYS", defaults.stats_window)?,
            enable_auto_cleanup: env_or("PROMPT_CACHE_AUTO_CLEANUP", defaults.enable_auto_cleanup)?,
            cleanup_interval: std::time::Duration::from_secs(env_or(
                "PROMPT_CACHE_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval.as_secs(),
            )?),
            max_write_retries: env_or("PROMPT_CACHE_MAX_WRITE_RETRIES", defaults.max_write_retries)?,
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            PromptCacheError::ConfigError(format!("{} has an invalid value: {:?}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn env_days_or(name: &str, default: Duration) -> Result<Duration> {
    let days: i64 = env_or(name, default.num_seconds() / DAY_SECS)?;
    Duration::try_days(days)
        .ok_or_else(|| PromptCacheError::ConfigError(format!("{} is out of range: {}", name, days)))
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    affinity_tolerance: Option<u8>,
    default_ttl: Option<Duration>,
    extended_ttl: Option<Duration>,
    extension_threshold: Option<u32>,
    max_use_count: Option<u32>,
    prune_horizon: Option<Duration>,
    prune_min_use_count: Option<u32>,
    stats_window: Option<Duration>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<std::time::Duration>,
    max_write_retries: Option<u32>,
}

impl CacheConfigBuilder {
    /// Set the lookup window half-width
    pub fn affinity_tolerance(mut self, tolerance: u8) -> Self {
        self.affinity_tolerance = Some(tolerance);
        self
    }

    /// Set TTL for new entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL for frequently used entries
    pub fn extended_ttl(mut self, ttl: Duration) -> Self {
        self.extended_ttl = Some(ttl);
        self
    }

    pub fn extension_threshold(mut self, threshold: u32) -> Self {
        self.extension_threshold = Some(threshold);
        self
    }

    pub fn max_use_count(mut self, max: u32) -> Self {
        self.max_use_count = Some(max);
        self
    }

    /// Set how long an unused entry survives pruning
    pub fn prune_horizon(mut self, horizon: Duration) -> Self {
        self.prune_horizon = Some(horizon);
        self
    }

    pub fn prune_min_use_count(mut self, min: u32) -> Self {
        self.prune_min_use_count = Some(min);
        self
    }

    pub fn stats_window(mut self, window: Duration) -> Self {
        self.stats_window = Some(window);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: std::time::Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn max_write_retries(mut self, retries: u32) -> Self {
        self.max_write_retries = Some(retries);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            affinity_tolerance: self.affinity_tolerance.unwrap_or(defaults.affinity_tolerance),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            extended_ttl: self.extended_ttl.unwrap_or(defaults.extended_ttl),
            extension_threshold: self
                .extension_threshold
                .unwrap_or(defaults.extension_threshold),
            max_use_count: self.max_use_count.unwrap_or(defaults.max_use_count),
            prune_horizon: self.prune_horizon.unwrap_or(defaults.prune_horizon),
            prune_min_use_count: self
                .prune_min_use_count
                .unwrap_or(defaults.prune_min_use_count),
            stats_window: self.stats_window.unwrap_or(defaults.stats_window),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            max_write_retries: self.max_write_retries.unwrap_or(defaults.max_write_retries),
        }
    }
}

/// Preset configurations
impl CacheConfig {
    /// Exact-level serving: every affinity change forces a new prompt
    pub fn exact_match() -> Self {
        Self {
            affinity_tolerance: 0,
            ..Default::default()
        }
    }

    /// Short retention for staging environments and load tests
    pub fn short_lived() -> Self {
        Self {
            default_ttl: Duration::days(1),
            extended_ttl: Duration::days(3),
            prune_horizon: Duration::days(1),
            stats_window: Duration::days(1),
            cleanup_interval: std::time::Duration::from_secs(300),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.affinity_tolerance, 5);
        assert_eq!(config.default_ttl, Duration::days(30));
        assert_eq!(config.extended_ttl, Duration::days(60));
        assert_eq!(config.extension_threshold, 10);
        assert_eq!(config.max_use_count, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = CacheConfig::default();
        invalid.affinity_tolerance = 101;
        assert!(invalid.validate().is_err());

        let mut invalid = CacheConfig::default();
        invalid.extended_ttl = Duration::days(10);
        assert!(invalid.validate().is_err());

        let mut invalid = CacheConfig::default();
        invalid.extension_threshold = 10_000;
        assert!(invalid.validate().is_err());

        let mut invalid = CacheConfig::default();
        invalid.cleanup_interval = std::time::Duration::ZERO;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .affinity_tolerance(3)
            .default_ttl(Duration::days(7))
            .max_write_retries(2)
            .build();

        assert_eq!(config.affinity_tolerance, 3);
        assert_eq!(config.default_ttl, Duration::days(7));
        assert_eq!(config.max_write_retries, 2);
        assert_eq!(config.extended_ttl, Duration::days(60));
    }

    #[test]
    fn test_preset_configs() {
        assert_eq!(CacheConfig::exact_match().affinity_tolerance, 0);
        assert!(CacheConfig::short_lived().validate().is_ok());
        assert_eq!(CacheConfig::short_lived().default_ttl, Duration::days(1));
    }

    #[test]
    fn test_from_env_defaults_and_rejects_garbage() {
        // Single test touches these variables so parallel tests don't race
        std::env::remove_var("PROMPT_CACHE_AFFINITY_TOLERANCE");
        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.affinity_tolerance, 5);

        std::env::set_var("PROMPT_CACHE_AFFINITY_TOLERANCE", "seven");
        assert!(CacheConfig::from_env().is_err());

        std::env::set_var("PROMPT_CACHE_AFFINITY_TOLERANCE", "7");
        assert_eq!(CacheConfig::from_env().unwrap().affinity_tolerance, 7);

        std::env::remove_var("PROMPT_CACHE_AFFINITY_TOLERANCE");

        // Beyond what a duration can hold
        std::env::set_var("PROMPT_CACHE_TTL_DAYS", "200000000000");
        assert!(matches!(CacheConfig::from_env(), Err(PromptCacheError::ConfigError(_))));

        // Representable, but every insert would overflow the clock
        std::env::set_var("PROMPT_CACHE_TTL_DAYS", "100000000");
        std::env::set_var("PROMPT_CACHE_EXTENDED_TTL_DAYS", "100000000");
        assert!(matches!(CacheConfig::from_env(), Err(PromptCacheError::ConfigError(_))));

        std::env::remove_var("PROMPT_CACHE_TTL_DAYS");
        std::env::remove_var("PROMPT_CACHE_EXTENDED_TTL_DAYS");
        assert!(CacheConfig::from_env().is_ok());
    }

    #[test]
    fn test_validation_bounds_retention() {
        let mut config = CacheConfig::default();
        config.extended_ttl = Duration::days(MAX_RETENTION_DAYS + 1);
        assert!(config.validate().is_err());

        let mut config = CacheConfig::default();
        config.stats_window = Duration::days(MAX_RETENTION_DAYS + 1);
        assert!(config.validate().is_err());

        let mut config = CacheConfig::default();
        config.default_ttl = Duration::days(MAX_RETENTION_DAYS);
        config.extended_ttl = Duration::days(MAX_RETENTION_DAYS);
        assert!(config.validate().is_ok());
    }
}
