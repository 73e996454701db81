//! Configuration for the cache gate

use crate::cache::entry::ExpirationPolicy;
use crate::error::GateError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds and default expiration of a single tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Maximum number of entries before LRU eviction kicks in
    pub max_entries: usize,

    /// Time-to-live applied to generated entries (zero means unbounded)
    pub time_to_live: Duration,

    /// Time-to-idle applied to generated entries (zero means unbounded)
    pub time_to_idle: Duration,
}

impl TierConfig {
    pub fn new(max_entries: usize, time_to_live: Duration, time_to_idle: Duration) -> Self {
        Self {
            max_entries,
            time_to_live,
            time_to_idle,
        }
    }

    /// Expiration given to entries that did not ask for one
    pub fn default_expiration(&self) -> ExpirationPolicy {
        ExpirationPolicy::timed(self.time_to_live, self.time_to_idle)
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err(format!("{} max_entries must be greater than 0", name));
        }
        Ok(())
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            // one day
            time_to_live: Duration::from_secs(86_400),
            time_to_idle: Duration::from_secs(86_400),
        }
    }
}

/// Configuration for the cache gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// The bounded, time-limited tier every generated value lands in
    pub evictable: TierConfig,

    /// Optional second tier; `Some` turns the gate into its two-tier variant
    pub non_evictable: Option<TierConfig>,

    /// Miss logging is emitted at level 2 and above
    pub debug_level: u8,

    /// Interval for automatic cleanup checks
    pub cleanup_interval: Duration,

    /// Enable hit/miss accounting
    pub enable_metrics: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            evictable: TierConfig::default(),
            non_evictable: None,
            debug_level: 2,
            // Cleanup every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            enable_metrics: true,
        }
    }
}

pub const ENV_MAX_ELEMENTS: &str = "IXCACHE_MAX_ELEMENTS";
pub const ENV_TIME_TO_LIVE: &str = "IXCACHE_TIME_TO_LIVE";
pub const ENV_TIME_TO_IDLE: &str = "IXCACHE_TIME_TO_IDLE";
pub const ENV_NON_EVICTABLE_MAX_ELEMENTS: &str = "IXCACHE_NON_EVICTABLE_MAX_ELEMENTS";
pub const ENV_NON_EVICTABLE_TIME_TO_LIVE: &str = "IXCACHE_NON_EVICTABLE_TIME_TO_LIVE";
pub const ENV_NON_EVICTABLE_TIME_TO_IDLE: &str = "IXCACHE_NON_EVICTABLE_TIME_TO_IDLE";
pub const ENV_DEBUG_LEVEL: &str = "IXCACHE_DEBUG_LEVEL";

impl GateConfig {
    /// Create a new builder for gate configuration
    pub fn builder() -> GateConfigBuilder {
        GateConfigBuilder::default()
    }

    /// Single-tier configuration
    pub fn single(max_entries: usize, time_to_live: Duration, time_to_idle: Duration) -> Self {
        Self {
            evictable: TierConfig::new(max_entries, time_to_live, time_to_idle),
            ..Default::default()
        }
    }

    /// Whether the non-evictable tier is enabled
    pub fn is_two_tier(&self) -> bool {
        self.non_evictable.is_some()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), GateError> {
        self.evictable.validate("evictable").map_err(GateError::Config)?;
        if let Some(non_evictable) = &self.non_evictable {
            non_evictable
                .validate("non_evictable")
                .map_err(GateError::Config)?;
        }
        if self.cleanup_interval.is_zero() {
            return Err(GateError::Config(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve configuration from `IXCACHE_*` environment variables, falling back
    /// to defaults for anything unset. Durations are in seconds.
    pub fn from_env() -> Result<Self, GateError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TierConfig::default();
        let mut builder = GateConfig::builder();

        if let Some(max) = parse_var::<usize>(&lookup, ENV_MAX_ELEMENTS)? {
            builder = builder.max_entries(max);
        }
        if let Some(ttl) = parse_var::<u64>(&lookup, ENV_TIME_TO_LIVE)? {
            builder = builder.time_to_live(Duration::from_secs(ttl));
        }
        if let Some(tti) = parse_var::<u64>(&lookup, ENV_TIME_TO_IDLE)? {
            builder = builder.time_to_idle(Duration::from_secs(tti));
        }
        if let Some(level) = parse_var::<u8>(&lookup, ENV_DEBUG_LEVEL)? {
            builder = builder.debug_level(level);
        }

        if let Some(max) = parse_var::<usize>(&lookup, ENV_NON_EVICTABLE_MAX_ELEMENTS)? {
            let ttl = parse_var::<u64>(&lookup, ENV_NON_EVICTABLE_TIME_TO_LIVE)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.time_to_live);
            let tti = parse_var::<u64>(&lookup, ENV_NON_EVICTABLE_TIME_TO_IDLE)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.time_to_idle);
            builder = builder.non_evictable(max, ttl, tti);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, GateError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| GateError::Config(format!("{} has invalid value '{}'", name, raw))),
    }
}

/// Builder for gate configuration
#[derive(Debug, Default)]
pub struct GateConfigBuilder {
    max_entries: Option<usize>,
    time_to_live: Option<Duration>,
    time_to_idle: Option<Duration>,
    non_evictable: Option<TierConfig>,
    debug_level: Option<u8>,
    cleanup_interval: Option<Duration>,
    enable_metrics: Option<bool>,
}

impl GateConfigBuilder {
    /// Set maximum number of evictable entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set time-to-live of generated entries
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set time-to-idle of generated entries
    pub fn time_to_idle(mut self, tti: Duration) -> Self {
        self.time_to_idle = Some(tti);
        self
    }

    /// Enable the non-evictable tier
    pub fn non_evictable(mut self, max_entries: usize, time_to_live: Duration, time_to_idle: Duration) -> Self {
        self.non_evictable = Some(TierConfig::new(max_entries, time_to_live, time_to_idle));
        self
    }

    /// Set debug level
    pub fn debug_level(mut self, level: u8) -> Self {
        self.debug_level = Some(level);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the gate configuration
    pub fn build(self) -> GateConfig {
        let defaults = GateConfig::default();

        GateConfig {
            evictable: TierConfig {
                max_entries: self.max_entries.unwrap_or(defaults.evictable.max_entries),
                time_to_live: self.time_to_live.unwrap_or(defaults.evictable.time_to_live),
                time_to_idle: self.time_to_idle.unwrap_or(defaults.evictable.time_to_idle),
            },
            non_evictable: self.non_evictable,
            debug_level: self.debug_level.unwrap_or(defaults.debug_level),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}
